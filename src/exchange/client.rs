// src/exchange/client.rs
use crate::domain::errors::{ExchangeError, ExchangeResult};
use crate::domain::models::{BuyFill, PriceHistory, SellFill};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;

/// Order and market data surface the trading core needs from an exchange
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Market buy spending `usdt_amount` of the quote asset
    async fn place_market_buy(&self, symbol: &str, usdt_amount: Decimal) -> ExchangeResult<BuyFill>;

    /// Market sell of `quantity` base units
    async fn place_market_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<SellFill>;

    /// Get historical klines (candlesticks), oldest first
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<PriceHistory>;
}

/// Run an exchange call with an upper bound on its duration.
pub async fn with_timeout<T, F>(timeout_secs: u64, call: F) -> ExchangeResult<T>
where
    F: Future<Output = ExchangeResult<T>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout(timeout_secs)),
    }
}
