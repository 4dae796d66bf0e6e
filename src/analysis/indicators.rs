// src/analysis/indicators.rs
use crate::config::IndicatorConfig;
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{
    BollingerValues, IndicatorValues, MacdValues, MarketSnapshot, PriceHistory, StochasticValues,
};
use chrono::Utc;
use ta::indicators::MovingAverageConvergenceDivergence;
use ta::Next;

/// Simple Moving Average (SMA) series
pub fn calculate_sma(prices: &[f64], period: usize) -> AnalysisResult<Vec<f64>> {
    if period == 0 || prices.len() < period {
        return Err(AnalysisError::InsufficientData(format!(
            "Not enough data for SMA calculation. Need at least {} points, got {}",
            period,
            prices.len()
        )));
    }

    let mut result = Vec::with_capacity(prices.len() - period + 1);
    let mut sum = prices.iter().take(period).sum::<f64>();

    // First SMA value
    result.push(sum / period as f64);

    // Calculate remaining values with sliding window
    for i in period..prices.len() {
        sum = sum - prices[i - period] + prices[i];
        result.push(sum / period as f64);
    }

    Ok(result)
}

/// Moving average of the last `period` prices.
pub fn moving_average(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Relative Strength Index over the last `period` price changes.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in prices.len() - period..prices.len() {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    if losses == 0.0 {
        return Some(100.0);
    }

    let rs = gains / losses;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Latest MACD line, signal line and histogram.
///
/// Needs at least `slow + signal - 1` prices so the signal line has a full window behind it.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdValues> {
    if fast == 0 || slow == 0 || signal == 0 || prices.len() + 1 < slow + signal {
        return None;
    }

    let mut indicator = match MovingAverageConvergenceDivergence::new(fast, slow, signal) {
        Ok(indicator) => indicator,
        Err(e) => {
            log::warn!("Invalid MACD parameters {}/{}/{}: {:?}", fast, slow, signal, e);
            return None;
        }
    };

    prices
        .iter()
        .map(|&price| indicator.next(price))
        .last()
        .map(|output| MacdValues {
            macd_line: output.macd,
            signal_line: output.signal,
            histogram: output.histogram,
        })
}

/// Bollinger Bands over the last `period` prices (population standard deviation).
pub fn bollinger_bands(prices: &[f64], period: usize, std_dev_multiplier: f64) -> Option<BollingerValues> {
    let middle = moving_average(prices, period)?;
    let window = &prices[prices.len() - period..];

    let variance = window.iter().map(|&x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let bandwidth = if middle == 0.0 {
        0.0
    } else {
        (2.0 * std_dev_multiplier * std_dev) / middle
    };

    Some(BollingerValues {
        upper: middle + std_dev_multiplier * std_dev,
        middle,
        lower: middle - std_dev_multiplier * std_dev,
        bandwidth,
    })
}

/// Stochastic oscillator: %K smoothed by an SMA of `smooth_k`, %D the SMA of smoothed %K.
///
/// A flat high/low range reads as 100.
pub fn stochastic(
    closes: &[f64],
    highs: &[f64],
    lows: &[f64],
    period: usize,
    smooth_k: usize,
    smooth_d: usize,
) -> Option<StochasticValues> {
    if period == 0 || closes.len() < period || highs.len() < closes.len() || lows.len() < closes.len() {
        return None;
    }

    let raw_k: Vec<f64> = (period - 1..closes.len())
        .map(|i| {
            let window = i + 1 - period..i + 1;
            let highest = highs[window.clone()].iter().copied().fold(f64::MIN, f64::max);
            let lowest = lows[window].iter().copied().fold(f64::MAX, f64::min);
            if highest == lowest {
                100.0
            } else {
                (closes[i] - lowest) / (highest - lowest) * 100.0
            }
        })
        .collect();

    let smoothed_k = if smooth_k > 1 {
        calculate_sma(&raw_k, smooth_k).ok()?
    } else {
        raw_k
    };

    let percent_k = *smoothed_k.last()?;
    let percent_d = if smooth_d > 0 {
        calculate_sma(&smoothed_k, smooth_d)
            .ok()
            .and_then(|d| d.last().copied())
    } else {
        None
    };

    Some(StochasticValues {
        percent_k,
        percent_d,
    })
}

/// Average True Range: mean of the last `period` true ranges.
pub fn atr(closes: &[f64], highs: &[f64], lows: &[f64], period: usize) -> Option<f64> {
    if period == 0
        || closes.len() < period + 1
        || highs.len() < closes.len()
        || lows.len() < closes.len()
    {
        return None;
    }

    let true_ranges: Vec<f64> = (1..closes.len())
        .map(|i| {
            let previous_close = closes[i - 1];
            let tr1 = (highs[i] - lows[i]).abs();
            let tr2 = (highs[i] - previous_close).abs();
            let tr3 = (previous_close - lows[i]).abs();
            tr1.max(tr2).max(tr3)
        })
        .collect();

    let recent = &true_ranges[true_ranges.len() - period..];
    Some(recent.iter().sum::<f64>() / period as f64)
}

/// Compute every indicator the scorer consumes for the given history.
pub fn compute_indicators(history: &PriceHistory, config: &IndicatorConfig) -> IndicatorValues {
    let closes = history.close_prices();
    let highs = history.high_prices();
    let lows = history.low_prices();

    IndicatorValues {
        ma5: moving_average(&closes, config.ma_short_period),
        ma20: moving_average(&closes, config.ma_long_period),
        rsi14: rsi(&closes, config.rsi_period),
        macd: macd(
            &closes,
            config.macd_fast_period,
            config.macd_slow_period,
            config.macd_signal_period,
        ),
        bollinger: bollinger_bands(&closes, config.bollinger_period, config.bollinger_std_dev),
        stochastic: stochastic(
            &closes,
            &highs,
            &lows,
            config.stochastic_period,
            config.stochastic_smooth_k,
            config.stochastic_smooth_d,
        ),
        atr: atr(&closes, &highs, &lows, config.atr_period),
    }
}

/// Capture a market snapshot for one cycle.
pub fn build_snapshot(history: &PriceHistory, config: &IndicatorConfig) -> MarketSnapshot {
    MarketSnapshot {
        symbol: history.symbol.clone(),
        timestamp: Utc::now(),
        prices: history.closes(),
        high_prices: Some(history.highs()),
        low_prices: Some(history.lows()),
        indicators: compute_indicators(history, config),
    }
}
