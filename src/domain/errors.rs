// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Order error: {0}")]
    Order(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),
}

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("No data available for: {0}")]
    NoData(String),
}

#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("Order execution error: {0}")]
    OrderExecution(#[from] ExchangeError),

    #[error("Position already open for {0}")]
    DuplicatePosition(String),

    #[error("Position management error: {0}")]
    PositionManagement(String),

    #[error("Trading halted: {0}")]
    Halted(String),

    #[error("Signal error: {0}")]
    Signal(String),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data for analysis: {0}")]
    InsufficientData(String),
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type ExchangeResult<T> = Result<T, ExchangeError>;
pub type MarketDataResult<T> = Result<T, MarketDataError>;
pub type TradingResult<T> = Result<T, TradingError>;
pub type AnalysisResult<T> = Result<T, AnalysisError>;
