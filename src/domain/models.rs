// src/domain/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Minimum number of closing prices needed before any trading decision is made.
pub const MIN_PRICE_POINTS: usize = 50;

/// Acknowledgement of a market buy. Exchanges do not always echo the fill,
/// so quantity and price are optional and the caller falls back to its own estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyFill {
    pub order_id: String,
    pub executed_qty: Option<Decimal>,
    pub fill_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SellFill {
    pub order_id: String,
    pub executed_qty: Option<Decimal>,
}

/// Market Data Structures
#[derive(Debug, Clone, Default)]
pub struct Candlestick {
    pub symbol: String,
    pub interval: String,
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

// Generic price history container for technical analysis
#[derive(Debug, Clone)]
pub struct PriceHistory {
    pub symbol: String,
    pub interval: String,
    pub candles: Vec<Candlestick>,
}

impl PriceHistory {
    pub fn new(symbol: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            candles: Vec::new(),
        }
    }

    pub fn add_candle(&mut self, candle: Candlestick) {
        self.candles.push(candle);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn close_prices(&self) -> Vec<f64> {
        to_f64_series(&self.closes())
    }

    pub fn high_prices(&self) -> Vec<f64> {
        to_f64_series(&self.highs())
    }

    pub fn low_prices(&self) -> Vec<f64> {
        to_f64_series(&self.lows())
    }
}

pub fn to_f64_series(values: &[Decimal]) -> Vec<f64> {
    values
        .iter()
        .map(|v| v.to_f64().unwrap_or_default())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValues {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerValues {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub bandwidth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochasticValues {
    pub percent_k: f64,
    pub percent_d: Option<f64>,
}

/// Latest indicator readings for one symbol. `None` means not enough history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValues {
    pub ma5: Option<f64>,
    pub ma20: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd: Option<MacdValues>,
    pub bollinger: Option<BollingerValues>,
    pub stochastic: Option<StochasticValues>,
    pub atr: Option<f64>,
}

/// One cycle's price and indicator data for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub prices: Vec<Decimal>,
    pub high_prices: Option<Vec<Decimal>>,
    pub low_prices: Option<Vec<Decimal>>,
    pub indicators: IndicatorValues,
}

impl MarketSnapshot {
    pub fn new(symbol: &str, prices: Vec<Decimal>) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            prices,
            high_prices: None,
            low_prices: None,
            indicators: IndicatorValues::default(),
        }
    }

    pub fn with_indicators(mut self, indicators: IndicatorValues) -> Self {
        self.indicators = indicators;
        self
    }

    /// Last closing price, if any.
    pub fn current_price(&self) -> Option<Decimal> {
        self.prices.last().copied()
    }

    pub fn has_enough_data(&self) -> bool {
        self.prices.len() >= MIN_PRICE_POINTS
    }

    /// ATR as a decimal, skipping non-positive or non-finite readings.
    pub fn atr(&self) -> Option<Decimal> {
        self.indicators
            .atr
            .filter(|atr| atr.is_finite() && *atr > 0.0)
            .and_then(Decimal::from_f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Buy,
    Neutral,
    ForceBuy,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "BUY"),
            SignalKind::Neutral => write!(f, "NEUTRAL"),
            SignalKind::ForceBuy => write!(f, "FORCE_BUY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubSignal {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndicatorFamily {
    MovingAverageCrossover,
    Rsi,
    Macd,
    Bollinger,
    Stochastic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub name: String,
    pub value: f64,
}

impl IndicatorValue {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDetail {
    pub signal: SubSignal,
    pub values: Vec<IndicatorValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub signal: SignalKind,
    pub score: u8,
    pub details: BTreeMap<IndicatorFamily, IndicatorDetail>,
    pub error: Option<String>,
}

impl SignalResult {
    pub fn neutral(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            signal: SignalKind::Neutral,
            score: 0,
            details: BTreeMap::new(),
            error: None,
        }
    }

    pub fn bullish_count(&self) -> usize {
        self.details
            .values()
            .filter(|d| d.signal == SubSignal::Bullish)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    ManualClose,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "STOP_LOSS"),
            CloseReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            CloseReason::TrailingStop => write!(f, "TRAILING_STOP"),
            CloseReason::ManualClose => write!(f, "MANUAL_CLOSE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Profits {
    pub raw: Decimal,
    pub percent: Decimal,
}

/// Long spot position tracked by the position manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    /// High-water mark since entry, drives the trailing stop.
    pub highest_price: Decimal,
    pub trailing_stop_distance: Decimal,
    pub open_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub status: PositionStatus,
    pub exit_price: Option<Decimal>,
    pub close_time: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    pub profits: Option<Profits>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Realized P/L if the position were closed at `exit_price`.
    pub fn profits_at(&self, exit_price: Decimal) -> Profits {
        let raw = (exit_price - self.entry_price) * self.quantity;
        let percent = if self.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (exit_price / self.entry_price - Decimal::ONE) * Decimal::ONE_HUNDRED
        };
        Profits { raw, percent }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionAction {
    Open,
    Close,
}

/// Broadcast after every position state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub action: PositionAction,
    pub symbol: String,
    pub position: Position,
}
