// src/exchange/mod.rs
pub mod client;
pub mod mexc;

pub use client::ExchangeGateway;
pub use mexc::MexcGateway;
