// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use signal_trader::config::{Config, RiskConfig};
use signal_trader::domain::errors::{ExchangeError, ExchangeResult};
use signal_trader::domain::models::{BuyFill, Candlestick, MarketSnapshot, PriceHistory, SellFill};
use signal_trader::exchange::client::ExchangeGateway;
use signal_trader::trading::positions::PositionManager;
use signal_trader::trading::strategies::MultiSignalStrategy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory exchange with scripted klines, optional latency and switchable order failures.
#[derive(Default)]
pub struct ScriptedGateway {
    klines: Mutex<HashMap<String, PriceHistory>>,
    klines_delay: Mutex<Option<Duration>>,
    buy_fill: Mutex<Option<(Decimal, Decimal)>>,
    buy_amounts: Mutex<Vec<Decimal>>,
    fail_buys: AtomicBool,
    fail_sells: AtomicBool,
    pub buys: AtomicUsize,
    pub sells: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_klines(&self, history: PriceHistory) {
        self.klines
            .lock()
            .unwrap()
            .insert(history.symbol.clone(), history);
    }

    /// Make every klines request take `delay`.
    pub fn set_klines_delay(&self, delay: Duration) {
        *self.klines_delay.lock().unwrap() = Some(delay);
    }

    /// Quantity and price reported by the next buys. Unset means the ack carries neither.
    pub fn set_buy_fill(&self, quantity: Decimal, price: Decimal) {
        *self.buy_fill.lock().unwrap() = Some((quantity, price));
    }

    pub fn fail_buys(&self, fail: bool) {
        self.fail_buys.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sells(&self, fail: bool) {
        self.fail_sells.store(fail, Ordering::SeqCst);
    }

    pub fn buy_count(&self) -> usize {
        self.buys.load(Ordering::SeqCst)
    }

    pub fn sell_count(&self) -> usize {
        self.sells.load(Ordering::SeqCst)
    }

    /// USDT amounts of every buy that reached the exchange
    pub fn buy_amounts(&self) -> Vec<Decimal> {
        self.buy_amounts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    async fn place_market_buy(&self, symbol: &str, usdt_amount: Decimal) -> ExchangeResult<BuyFill> {
        self.buys.fetch_add(1, Ordering::SeqCst);
        self.buy_amounts.lock().unwrap().push(usdt_amount);
        if self.fail_buys.load(Ordering::SeqCst) {
            return Err(ExchangeError::Order(format!("BUY {} rejected", symbol)));
        }
        let fill = *self.buy_fill.lock().unwrap();
        Ok(BuyFill {
            order_id: format!("buy-{}", symbol),
            executed_qty: fill.map(|(qty, _)| qty),
            fill_price: fill.map(|(_, price)| price),
        })
    }

    async fn place_market_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<SellFill> {
        self.sells.fetch_add(1, Ordering::SeqCst);
        if self.fail_sells.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api(format!("SELL {} rejected", symbol)));
        }
        Ok(SellFill {
            order_id: format!("sell-{}", symbol),
            executed_qty: Some(quantity),
        })
    }

    async fn get_klines(&self, symbol: &str, _interval: &str, _limit: u32) -> ExchangeResult<PriceHistory> {
        let delay = *self.klines_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.klines
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::Api(format!("Invalid symbol: {}", symbol)))
    }
}

/// Candles with high = close + 1 and low = close - 1.
pub fn history(symbol: &str, closes: &[Decimal]) -> PriceHistory {
    let mut history = PriceHistory::new(symbol, "1m");
    for (i, close) in closes.iter().enumerate() {
        history.add_candle(Candlestick {
            symbol: symbol.to_string(),
            interval: "1m".to_string(),
            open_time: i as i64 * 60_000,
            close_time: i as i64 * 60_000 + 59_999,
            open: *close,
            high: *close + Decimal::ONE,
            low: *close - Decimal::ONE,
            close: *close,
            volume: dec!(1000),
        });
    }
    history
}

/// Steady slide ending in a sharp drop: oversold RSI, price under the lower
/// band and a low stochastic, so the multi-signal scorer says BUY. Last close 127, ATR 3.
pub fn oversold_closes() -> Vec<Decimal> {
    let mut closes: Vec<Decimal> = (0..59).map(|i| Decimal::from(200 - i)).collect();
    closes.push(dec!(127));
    closes
}

/// Flat market: scores 0.
pub fn flat_closes() -> Vec<Decimal> {
    vec![dec!(50); 60]
}

/// Snapshot carrying only a price and an optional ATR reading.
pub fn priced_snapshot(symbol: &str, price: Decimal, atr: Option<f64>) -> MarketSnapshot {
    let mut snapshot = MarketSnapshot::new(symbol, vec![price]);
    snapshot.indicators.atr = atr;
    snapshot
}

pub fn snapshots(entries: &[(&str, Decimal, Option<f64>)]) -> HashMap<String, MarketSnapshot> {
    entries
        .iter()
        .map(|(symbol, price, atr)| (symbol.to_string(), priced_snapshot(symbol, *price, *atr)))
        .collect()
}

pub fn manager(dry_run: bool) -> (PositionManager, Arc<ScriptedGateway>) {
    let gateway = ScriptedGateway::new();
    let strategy = Arc::new(MultiSignalStrategy::new(RiskConfig::default()));
    (PositionManager::new(strategy, gateway.clone(), dry_run), gateway)
}

pub fn test_config(symbols: &[&str], dry_run: bool) -> Config {
    let mut config = Config::default();
    config.trading.symbols = symbols.iter().map(|s| s.to_string()).collect();
    config.trading.dry_run = dry_run;
    config.exchange.api_key = "test-key".to_string();
    config.exchange.api_secret = "test-secret".to_string();
    config
}
