// src/trading/mod.rs
pub mod orchestrator;
pub mod positions;
pub mod risk;
pub mod safety;
pub mod strategies;

pub use orchestrator::{
    BotStatus, CycleReport, ForceTradeOutcome, SafetyStatus, TradeStats, TradingBot,
};
pub use positions::{CloseFailure, PositionManager, PositionStore, UpdateReport};
pub use strategies::{FixedRiskStrategy, MultiSignalStrategy, Strategy};
