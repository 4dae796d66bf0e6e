// src/trading/positions.rs
use crate::domain::errors::{TradingError, TradingResult};
use crate::domain::models::{
    CloseReason, MarketSnapshot, Position, PositionAction, PositionEvent, PositionStatus,
};
use crate::exchange::client::ExchangeGateway;
use crate::trading::risk;
use crate::trading::strategies::Strategy;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Open positions keyed by symbol plus every position closed so far.
#[derive(Debug, Default)]
pub struct PositionStore {
    open: HashMap<String, Position>,
    closed: Vec<Position>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_open(&self, symbol: &str) -> bool {
        self.open.contains_key(symbol)
    }

    pub fn get_open(&self, symbol: &str) -> Option<&Position> {
        self.open.get(symbol)
    }

    fn get_open_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.open.get_mut(symbol)
    }

    fn insert_open(&mut self, position: Position) {
        self.open.insert(position.symbol.clone(), position);
    }

    fn take_open(&mut self, symbol: &str) -> Option<Position> {
        self.open.remove(symbol)
    }

    fn push_closed(&mut self, position: Position) {
        self.closed.push(position);
    }

    pub fn open_positions(&self) -> &HashMap<String, Position> {
        &self.open
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }
}

/// A triggered exit the exchange refused; the position stays open for the next cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseFailure {
    pub symbol: String,
    pub reason: CloseReason,
    pub error: String,
}

/// Outcome of one `update` pass
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub closed: Vec<Position>,
    pub failed: Vec<CloseFailure>,
}

/// Sole writer of the position store. Opens positions, runs the exit rules
/// every cycle and closes positions through the exchange.
pub struct PositionManager {
    store: PositionStore,
    strategy: Arc<dyn Strategy>,
    gateway: Arc<dyn ExchangeGateway>,
    dry_run: bool,
    events: broadcast::Sender<PositionEvent>,
}

impl PositionManager {
    pub fn new(strategy: Arc<dyn Strategy>, gateway: Arc<dyn ExchangeGateway>, dry_run: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: PositionStore::new(),
            strategy,
            gateway,
            dry_run,
            events,
        }
    }

    /// Subscribe to open/close events
    pub fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<PositionEvent> {
        self.events.clone()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    /// Record a new long position. Exit levels come from the strategy hooks.
    pub fn open(
        &mut self,
        symbol: &str,
        entry_price: Decimal,
        quantity: Decimal,
        snapshot: Option<&MarketSnapshot>,
    ) -> TradingResult<Position> {
        if self.store.has_open(symbol) {
            log::warn!("Position already open for {}, ignoring open request", symbol);
            return Err(TradingError::DuplicatePosition(symbol.to_string()));
        }
        if entry_price <= Decimal::ZERO || quantity <= Decimal::ZERO {
            return Err(TradingError::PositionManagement(format!(
                "Invalid entry for {}: price {} quantity {}",
                symbol, entry_price, quantity
            )));
        }

        let now = Utc::now();
        let position = Position {
            symbol: symbol.to_string(),
            entry_price,
            quantity,
            stop_loss_price: self.strategy.calculate_stop_loss(entry_price, snapshot),
            take_profit_price: self.strategy.calculate_take_profit(entry_price, snapshot),
            highest_price: entry_price,
            trailing_stop_distance: entry_price * self.strategy.trailing_stop_pct(),
            open_time: now,
            last_update_time: now,
            status: PositionStatus::Open,
            exit_price: None,
            close_time: None,
            close_reason: None,
            profits: None,
        };

        log::info!(
            "Opened position {}: {} @ {} (SL {}, TP {})",
            symbol,
            quantity,
            entry_price,
            position.stop_loss_price,
            position.take_profit_price
        );

        self.store.insert_open(position.clone());
        self.emit(PositionAction::Open, &position);
        Ok(position)
    }

    /// Run the exit rules for every open position against this cycle's snapshots.
    ///
    /// A refused sell does not stop the pass; it is reported in `failed`.
    pub async fn update(&mut self, snapshots: &HashMap<String, MarketSnapshot>) -> UpdateReport {
        let mut report = UpdateReport::default();
        let trailing_pct = self.strategy.trailing_stop_pct();

        let mut symbols: Vec<String> = self.store.open_positions().keys().cloned().collect();
        symbols.sort();

        for symbol in symbols {
            let snapshot = match snapshots.get(&symbol) {
                Some(snapshot) => snapshot,
                None => {
                    log::warn!("No market data for open position {}, skipping", symbol);
                    continue;
                }
            };
            let current_price = match snapshot.current_price() {
                Some(price) => price,
                None => {
                    log::warn!("Empty price series for {}, skipping", symbol);
                    continue;
                }
            };

            let trigger = match self.store.get_open_mut(&symbol) {
                Some(position) => {
                    Self::evaluate_exit(position, snapshot, current_price, trailing_pct)
                }
                None => continue,
            };

            if let Some(reason) = trigger {
                log::info!("{} triggered for {} at {}", reason, symbol, current_price);
                match self.close(&symbol, current_price, reason).await {
                    Ok(Some(position)) => report.closed.push(position),
                    Ok(None) => {}
                    Err(e) => {
                        log::error!("Failed to close {} ({}): {}", symbol, reason, e);
                        report.failed.push(CloseFailure {
                            symbol: symbol.clone(),
                            reason,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report
    }

    /// Ratchet the high-water mark, then return the first exit that applies.
    /// With no exit, the stop may be raised instead.
    fn evaluate_exit(
        position: &mut Position,
        snapshot: &MarketSnapshot,
        current_price: Decimal,
        trailing_pct: Decimal,
    ) -> Option<CloseReason> {
        if current_price > position.highest_price {
            position.highest_price = current_price;
            position.last_update_time = Utc::now();
        }

        if current_price <= position.stop_loss_price {
            return Some(CloseReason::StopLoss);
        }
        if current_price >= position.take_profit_price {
            return Some(CloseReason::TakeProfit);
        }
        if position.highest_price > position.entry_price
            && current_price < risk::trailing_trigger(position.highest_price, trailing_pct)
        {
            return Some(CloseReason::TrailingStop);
        }

        if snapshot.atr().is_some() {
            if let Some(stop) = risk::tightened_stop(
                position.entry_price,
                position.highest_price,
                current_price,
                position.stop_loss_price,
            ) {
                log::info!(
                    "Raised stop loss for {}: {} -> {}",
                    position.symbol,
                    position.stop_loss_price,
                    stop
                );
                position.stop_loss_price = stop;
                position.last_update_time = Utc::now();
            }
        }

        None
    }

    /// Close the open position for `symbol` at `exit_price`.
    ///
    /// Returns `Ok(None)` when nothing is open. Outside dry run the sell goes to
    /// the exchange first; if it fails the position is left untouched.
    pub async fn close(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> TradingResult<Option<Position>> {
        let quantity = match self.store.get_open(symbol) {
            Some(position) => position.quantity,
            None => {
                log::debug!("No open position for {}, nothing to close", symbol);
                return Ok(None);
            }
        };

        if self.dry_run {
            log::info!("[DRY RUN] Would sell {} {} at {}", quantity, symbol, exit_price);
        } else {
            let fill = self.gateway.place_market_sell(symbol, quantity).await?;
            log::info!("Sell order {} filled for {}", fill.order_id, symbol);
        }

        let mut position = match self.store.take_open(symbol) {
            Some(position) => position,
            None => return Ok(None),
        };

        let now = Utc::now();
        position.profits = Some(position.profits_at(exit_price));
        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.close_time = Some(now);
        position.close_reason = Some(reason);
        position.last_update_time = now;

        if let Some(profits) = &position.profits {
            log::info!(
                "Closed position {} ({}): entry {} exit {} P/L {} ({}%)",
                symbol,
                reason,
                position.entry_price,
                exit_price,
                profits.raw.round_dp(8),
                profits.percent.round_dp(2)
            );
        }

        self.store.push_closed(position.clone());
        self.emit(PositionAction::Close, &position);
        Ok(Some(position))
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.store.has_open(symbol)
    }

    pub fn get_open_position(&self, symbol: &str) -> Option<Position> {
        self.store.get_open(symbol).cloned()
    }

    pub fn get_open_positions(&self) -> HashMap<String, Position> {
        self.store.open_positions().clone()
    }

    pub fn open_count(&self) -> usize {
        self.store.open_positions().len()
    }

    pub fn closed_positions(&self) -> Vec<Position> {
        self.store.closed_positions().to_vec()
    }

    fn emit(&self, action: PositionAction, position: &Position) {
        let event = PositionEvent {
            action,
            symbol: position.symbol.clone(),
            position: position.clone(),
        };
        // Err only means nobody is listening
        if self.events.send(event).is_err() {
            log::debug!("No subscribers for position event on {}", position.symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::domain::errors::{ExchangeError, ExchangeResult};
    use crate::domain::models::{BuyFill, PriceHistory, SellFill};
    use crate::trading::strategies::MultiSignalStrategy;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGateway {
        sells: AtomicUsize,
        fail_sells: bool,
    }

    #[async_trait]
    impl ExchangeGateway for CountingGateway {
        async fn place_market_buy(&self, _symbol: &str, _usdt: Decimal) -> ExchangeResult<BuyFill> {
            Err(ExchangeError::Order("buys not scripted".into()))
        }

        async fn place_market_sell(&self, _symbol: &str, quantity: Decimal) -> ExchangeResult<SellFill> {
            self.sells.fetch_add(1, Ordering::SeqCst);
            if self.fail_sells {
                Err(ExchangeError::Api("insufficient balance".into()))
            } else {
                Ok(SellFill {
                    order_id: "sell-1".into(),
                    executed_qty: Some(quantity),
                })
            }
        }

        async fn get_klines(&self, symbol: &str, interval: &str, _limit: u32) -> ExchangeResult<PriceHistory> {
            Ok(PriceHistory::new(symbol, interval))
        }
    }

    fn manager(dry_run: bool, fail_sells: bool) -> (PositionManager, Arc<CountingGateway>) {
        let gateway = Arc::new(CountingGateway {
            sells: AtomicUsize::new(0),
            fail_sells,
        });
        let strategy = Arc::new(MultiSignalStrategy::new(RiskConfig::default()));
        (PositionManager::new(strategy, gateway.clone(), dry_run), gateway)
    }

    fn priced(symbol: &str, price: Decimal, atr: Option<f64>) -> HashMap<String, MarketSnapshot> {
        let mut snapshot = MarketSnapshot::new(symbol, vec![price]);
        snapshot.indicators.atr = atr;
        HashMap::from([(symbol.to_string(), snapshot)])
    }

    #[test]
    fn open_sets_levels_and_guards_duplicates() {
        let (mut manager, _) = manager(true, false);
        let position = manager.open("BTCUSDT", dec!(100), dec!(1), None).unwrap();
        assert_eq!(position.stop_loss_price, dec!(98));
        assert_eq!(position.take_profit_price, dec!(105));
        assert_eq!(position.highest_price, dec!(100));
        assert_eq!(position.trailing_stop_distance, dec!(1));

        let again = manager.open("BTCUSDT", dec!(120), dec!(2), None);
        assert!(matches!(again, Err(TradingError::DuplicatePosition(s)) if s == "BTCUSDT"));
        assert_eq!(manager.get_open_position("BTCUSDT").unwrap().entry_price, dec!(100));
    }

    #[tokio::test]
    async fn live_close_sells_before_recording() {
        let (mut manager, gateway) = manager(false, false);
        manager.open("ETHUSDT", dec!(50), dec!(2), None).unwrap();

        let closed = manager
            .close("ETHUSDT", dec!(55), CloseReason::ManualClose)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gateway.sells.load(Ordering::SeqCst), 1);
        assert_eq!(closed.profits.unwrap().raw, dec!(10));
        assert_eq!(closed.profits.unwrap().percent, dec!(10));
        assert!(!manager.has_open_position("ETHUSDT"));
    }

    #[tokio::test]
    async fn failed_sell_keeps_position_and_reports() {
        let (mut manager, gateway) = manager(false, true);
        manager.open("ETHUSDT", dec!(100), dec!(1), None).unwrap();

        let report = manager.update(&priced("ETHUSDT", dec!(97), None)).await;
        assert!(report.closed.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].reason, CloseReason::StopLoss);
        assert!(manager.has_open_position("ETHUSDT"));
        assert!(manager.closed_positions().is_empty());
        assert_eq!(gateway.sells.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dry_run_skips_gateway() {
        let (mut manager, gateway) = manager(true, true);
        manager.open("ETHUSDT", dec!(100), dec!(1), None).unwrap();
        let report = manager.update(&priced("ETHUSDT", dec!(106), None)).await;
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].close_reason, Some(CloseReason::TakeProfit));
        assert_eq!(gateway.sells.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_snapshot_is_skipped() {
        let (mut manager, _) = manager(true, false);
        manager.open("ETHUSDT", dec!(100), dec!(1), None).unwrap();
        let report = manager.update(&priced("BTCUSDT", dec!(1), None)).await;
        assert!(report.closed.is_empty());
        assert!(report.failed.is_empty());

        let empty = HashMap::from([("ETHUSDT".to_string(), MarketSnapshot::new("ETHUSDT", vec![]))]);
        let report = manager.update(&empty).await;
        assert!(report.closed.is_empty());
        assert!(manager.has_open_position("ETHUSDT"));
    }

    #[tokio::test]
    async fn stop_needs_atr_to_tighten() {
        let (mut manager, _) = manager(true, false);
        manager.open("ETHUSDT", dec!(100), dec!(1), None).unwrap();
        manager.update(&priced("ETHUSDT", dec!(104), None)).await;
        let position = manager.get_open_position("ETHUSDT").unwrap();
        assert_eq!(position.highest_price, dec!(104));
        assert_eq!(position.stop_loss_price, dec!(98));

        manager.update(&priced("ETHUSDT", dec!(104), Some(2.0))).await;
        let position = manager.get_open_position("ETHUSDT").unwrap();
        assert_eq!(position.stop_loss_price, dec!(100.4));
    }
}
