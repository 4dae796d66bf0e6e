// src/domain/mod.rs
pub mod errors;
pub mod models;

// Re-export common types for convenience
pub use errors::{
    AnalysisError, AnalysisResult, AppError, AppResult, ExchangeError, ExchangeResult,
    MarketDataError, MarketDataResult, TradingError, TradingResult,
};
pub use models::{
    BollingerValues, BuyFill, Candlestick, CloseReason, IndicatorDetail, IndicatorFamily,
    IndicatorValue, IndicatorValues, MacdValues, MarketSnapshot, Position,
    PositionAction, PositionEvent, PositionStatus, PriceHistory, Profits, SellFill, SignalKind,
    SignalResult, StochasticValues, SubSignal, MIN_PRICE_POINTS,
};
