// src/trading/strategies.rs
use crate::config::RiskConfig;
use crate::domain::models::{
    IndicatorDetail, IndicatorFamily, IndicatorValue, MarketSnapshot, SignalKind, SignalResult,
    SubSignal,
};
use crate::trading::risk;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// %K below this reads as oversold
pub const STOCHASTIC_OVERSOLD: f64 = 20.0;

/// Entry scoring plus the sizing and exit-level hooks the position manager calls.
///
/// The provided hooks are the fixed-percent rules; strategies override the
/// ones they refine.
pub trait Strategy: Send + Sync {
    /// Get the name of the strategy
    fn name(&self) -> &str;

    /// Get the description of the strategy
    fn description(&self) -> &str;

    fn risk_config(&self) -> &RiskConfig;

    /// Score a snapshot. Never fails: missing data yields a neutral result.
    fn analyze(&self, symbol: &str, snapshot: &MarketSnapshot) -> SignalResult;

    /// Quote amount (USDT) to commit to a new position
    fn calculate_position_size(
        &self,
        account_size: Decimal,
        risk_percent: Decimal,
        _snapshot: Option<&MarketSnapshot>,
    ) -> Decimal {
        account_size * risk_percent
    }

    fn calculate_stop_loss(&self, entry_price: Decimal, _snapshot: Option<&MarketSnapshot>) -> Decimal {
        risk::fixed_stop_loss(entry_price, self.risk_config().stop_loss_pct)
    }

    fn calculate_take_profit(&self, entry_price: Decimal, _snapshot: Option<&MarketSnapshot>) -> Decimal {
        risk::fixed_take_profit(entry_price, self.risk_config().take_profit_pct)
    }

    fn trailing_stop_pct(&self) -> Decimal {
        self.risk_config().trailing_stop_pct
    }
}

/// Fixed-percent sizing and exits with no entry logic of its own.
pub struct FixedRiskStrategy {
    risk: RiskConfig,
}

impl FixedRiskStrategy {
    pub fn new(risk: RiskConfig) -> Self {
        Self { risk }
    }
}

impl Strategy for FixedRiskStrategy {
    fn name(&self) -> &str {
        "FixedRisk"
    }

    fn description(&self) -> &str {
        "Fixed-percent position size, stop loss and take profit; never signals entries"
    }

    fn risk_config(&self) -> &RiskConfig {
        &self.risk
    }

    fn analyze(&self, symbol: &str, _snapshot: &MarketSnapshot) -> SignalResult {
        SignalResult::neutral(symbol)
    }
}

/// Composite scorer: one point per bullish indicator family, BUY at `min_signal_score`.
pub struct MultiSignalStrategy {
    risk: RiskConfig,
}

impl MultiSignalStrategy {
    pub fn new(risk: RiskConfig) -> Self {
        Self { risk }
    }

    fn snapshot_atr(snapshot: Option<&MarketSnapshot>) -> Option<Decimal> {
        snapshot.and_then(MarketSnapshot::atr)
    }
}

impl Strategy for MultiSignalStrategy {
    fn name(&self) -> &str {
        "MultiSignal"
    }

    fn description(&self) -> &str {
        "Combines MA crossover, RSI, MACD, Bollinger Bands and Stochastic for entry signals"
    }

    fn risk_config(&self) -> &RiskConfig {
        &self.risk
    }

    fn analyze(&self, symbol: &str, snapshot: &MarketSnapshot) -> SignalResult {
        if !snapshot.has_enough_data() {
            let mut result = SignalResult::neutral(symbol);
            result.error = Some("Insufficient data for analysis".to_string());
            return result;
        }

        let indicators = &snapshot.indicators;
        let mut details = BTreeMap::new();

        if let (Some(ma5), Some(ma20)) = (indicators.ma5, indicators.ma20) {
            let signal = if ma5 > ma20 {
                SubSignal::Bullish
            } else {
                SubSignal::Bearish
            };
            details.insert(
                IndicatorFamily::MovingAverageCrossover,
                IndicatorDetail {
                    signal,
                    values: vec![
                        IndicatorValue::new("ma5", ma5),
                        IndicatorValue::new("ma20", ma20),
                    ],
                },
            );
        }

        if let Some(rsi) = indicators.rsi14 {
            let signal = if rsi < self.risk.rsi_oversold {
                SubSignal::Bullish
            } else {
                SubSignal::Neutral
            };
            details.insert(
                IndicatorFamily::Rsi,
                IndicatorDetail {
                    signal,
                    values: vec![IndicatorValue::new("rsi14", rsi)],
                },
            );
        }

        if let Some(macd) = indicators.macd {
            let signal = if macd.macd_line > macd.signal_line {
                SubSignal::Bullish
            } else {
                SubSignal::Bearish
            };
            details.insert(
                IndicatorFamily::Macd,
                IndicatorDetail {
                    signal,
                    values: vec![
                        IndicatorValue::new("macdLine", macd.macd_line),
                        IndicatorValue::new("signalLine", macd.signal_line),
                        IndicatorValue::new("histogram", macd.histogram),
                    ],
                },
            );
        }

        if let (Some(bands), Some(price)) = (
            indicators.bollinger,
            snapshot.current_price().and_then(|p| p.to_f64()),
        ) {
            let signal = if price < bands.lower {
                SubSignal::Bullish
            } else {
                SubSignal::Neutral
            };
            details.insert(
                IndicatorFamily::Bollinger,
                IndicatorDetail {
                    signal,
                    values: vec![
                        IndicatorValue::new("upper", bands.upper),
                        IndicatorValue::new("middle", bands.middle),
                        IndicatorValue::new("lower", bands.lower),
                        IndicatorValue::new("price", price),
                    ],
                },
            );
        }

        if let Some(stoch) = indicators.stochastic {
            let signal = if stoch.percent_k < STOCHASTIC_OVERSOLD {
                SubSignal::Bullish
            } else {
                SubSignal::Neutral
            };
            let mut values = vec![IndicatorValue::new("percentK", stoch.percent_k)];
            if let Some(d) = stoch.percent_d {
                values.push(IndicatorValue::new("percentD", d));
            }
            details.insert(
                IndicatorFamily::Stochastic,
                IndicatorDetail { signal, values },
            );
        }

        let score = details
            .values()
            .filter(|d| d.signal == SubSignal::Bullish)
            .count() as u8;
        let signal = if score >= self.risk.min_signal_score {
            SignalKind::Buy
        } else {
            SignalKind::Neutral
        };

        log::debug!("{} scored {}/5 ({})", symbol, score, signal);

        SignalResult {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            signal,
            score,
            details,
            error: None,
        }
    }

    fn calculate_position_size(
        &self,
        account_size: Decimal,
        risk_percent: Decimal,
        snapshot: Option<&MarketSnapshot>,
    ) -> Decimal {
        risk::volatility_adjusted_size(
            account_size * risk_percent,
            Self::snapshot_atr(snapshot),
            self.risk.atr_threshold,
        )
    }

    fn calculate_stop_loss(&self, entry_price: Decimal, snapshot: Option<&MarketSnapshot>) -> Decimal {
        match Self::snapshot_atr(snapshot) {
            Some(atr) => risk::atr_stop_loss(entry_price, self.risk.stop_loss_pct, atr),
            None => risk::fixed_stop_loss(entry_price, self.risk.stop_loss_pct),
        }
    }

    fn calculate_take_profit(&self, entry_price: Decimal, snapshot: Option<&MarketSnapshot>) -> Decimal {
        match Self::snapshot_atr(snapshot) {
            Some(atr) => risk::atr_take_profit(entry_price, self.risk.take_profit_pct, atr),
            None => risk::fixed_take_profit(entry_price, self.risk.take_profit_pct),
        }
    }
}
