// src/market_data/processor.rs
use crate::analysis::indicators::build_snapshot;
use crate::config::IndicatorConfig;
use crate::domain::errors::{MarketDataError, MarketDataResult};
use crate::domain::models::{MarketSnapshot, PriceHistory, MIN_PRICE_POINTS};
use crate::exchange::client::ExchangeGateway;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Turns fetched candles into indicator snapshots and keeps the latest one per symbol
pub struct MarketDataProcessor {
    indicator_config: IndicatorConfig,

    // Last good snapshot per symbol, kept across cycles
    latest: HashMap<String, MarketSnapshot>,
}

impl MarketDataProcessor {
    pub fn new(indicator_config: IndicatorConfig) -> Self {
        Self {
            indicator_config,
            latest: HashMap::new(),
        }
    }

    /// Build a snapshot from a price history and cache it.
    pub fn add_price_history(&mut self, history: &PriceHistory) -> MarketDataResult<MarketSnapshot> {
        if history.len() < MIN_PRICE_POINTS {
            return Err(MarketDataError::NoData(format!(
                "{} ({} candles, need {})",
                history.symbol,
                history.len(),
                MIN_PRICE_POINTS
            )));
        }

        if let Some(candle) = history
            .candles
            .iter()
            .find(|c| c.close <= Decimal::ZERO || c.high < c.low)
        {
            return Err(MarketDataError::InvalidFormat(format!(
                "{} candle at {}: close {}, high {}, low {}",
                history.symbol, candle.open_time, candle.close, candle.high, candle.low
            )));
        }

        let snapshot = build_snapshot(history, &self.indicator_config);
        self.latest.insert(snapshot.symbol.clone(), snapshot.clone());
        Ok(snapshot)
    }

    /// Fetch klines for every symbol with at most `concurrency` requests in flight.
    ///
    /// Only symbols refreshed this call are returned; failures are logged and skipped.
    pub async fn refresh(
        &mut self,
        gateway: &dyn ExchangeGateway,
        symbols: &[String],
        interval: &str,
        limit: u32,
        concurrency: usize,
    ) -> HashMap<String, MarketSnapshot> {
        let results: Vec<_> = stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                let history = gateway.get_klines(&symbol, interval, limit).await;
                (symbol, history)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut fresh = HashMap::new();
        for (symbol, result) in results {
            match result {
                Ok(history) => match self.add_price_history(&history) {
                    Ok(snapshot) => {
                        fresh.insert(symbol, snapshot);
                    }
                    Err(e) => log::warn!("Skipping {} this cycle: {}", symbol, e),
                },
                Err(e) => log::error!("Failed to fetch market data for {}: {}", symbol, e),
            }
        }

        log::info!(
            "Market data refreshed: {}/{} symbols usable",
            fresh.len(),
            symbols.len()
        );
        fresh
    }

    /// Get the latest snapshot for a symbol
    pub fn get_latest(&self, symbol: &str) -> Option<&MarketSnapshot> {
        self.latest.get(symbol)
    }

    pub fn latest_price(&self, symbol: &str) -> Option<Decimal> {
        self.latest.get(symbol).and_then(|s| s.current_price())
    }

    pub fn snapshots(&self) -> &HashMap<String, MarketSnapshot> {
        &self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Candlestick;
    use rust_decimal_macros::dec;

    fn history(symbol: &str, count: usize) -> PriceHistory {
        let mut history = PriceHistory::new(symbol, "1m");
        for i in 0..count {
            let close = dec!(100) + Decimal::from(i as u64);
            history.add_candle(Candlestick {
                symbol: symbol.to_string(),
                interval: "1m".to_string(),
                open_time: i as i64 * 60_000,
                close_time: i as i64 * 60_000 + 59_999,
                open: close,
                high: close + dec!(1),
                low: close - dec!(1),
                close,
                volume: dec!(10),
            });
        }
        history
    }

    #[test]
    fn short_history_is_rejected_and_not_cached() {
        let mut processor = MarketDataProcessor::new(IndicatorConfig::default());
        let result = processor.add_price_history(&history("ETHUSDT", 20));
        assert!(matches!(result, Err(MarketDataError::NoData(_))));
        assert!(processor.get_latest("ETHUSDT").is_none());
    }

    #[test]
    fn broken_candles_are_rejected() {
        let mut processor = MarketDataProcessor::new(IndicatorConfig::default());
        let mut broken = history("SOLUSDT", 60);
        broken.candles[30].close = Decimal::ZERO;

        let result = processor.add_price_history(&broken);
        assert!(matches!(result, Err(MarketDataError::InvalidFormat(_))));
        assert!(processor.get_latest("SOLUSDT").is_none());
    }

    #[test]
    fn caches_latest_snapshot() {
        let mut processor = MarketDataProcessor::new(IndicatorConfig::default());
        let snapshot = processor.add_price_history(&history("BTCUSDT", 60)).unwrap();
        assert_eq!(snapshot.prices.len(), 60);
        assert_eq!(processor.latest_price("BTCUSDT"), Some(dec!(159)));
        assert_eq!(processor.snapshots().len(), 1);
    }
}
