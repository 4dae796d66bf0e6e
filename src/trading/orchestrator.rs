// src/trading/orchestrator.rs
use crate::config::Config;
use crate::domain::errors::{TradingError, TradingResult};
use crate::domain::models::{
    CloseReason, MarketSnapshot, Position, PositionEvent, SignalKind, SignalResult,
};
use crate::exchange::client::ExchangeGateway;
use crate::market_data::processor::MarketDataProcessor;
use crate::trading::positions::{CloseFailure, PositionManager};
use crate::trading::safety::{self, DailyLossGuard};
use crate::trading::strategies::Strategy;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

/// Force trades without a symbol only fire above this score
const FORCE_TRADE_MIN_SCORE: u8 = 1;

/// Everything a cycle mutates, behind one lock.
pub struct EngineState {
    pub positions: PositionManager,
    pub market: MarketDataProcessor,
    pub daily: DailyLossGuard,
    started_at: Option<DateTime<Utc>>,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestTrade {
    pub symbol: String,
    pub profit_percent: Decimal,
}

/// Performance figures over every closed position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeStats {
    pub closed_trades: usize,
    pub win_rate: Decimal,
    pub total_profit_loss: Decimal,
    pub account_balance: Decimal,
    pub best_trade: Option<BestTrade>,
}

impl TradeStats {
    pub fn from_history(closed: &[Position], initial_balance: Decimal) -> Self {
        let mut total_profit_loss = Decimal::ZERO;
        let mut wins = 0usize;
        let mut best_trade: Option<BestTrade> = None;

        for (position, profits) in closed.iter().filter_map(|p| p.profits.map(|pr| (p, pr))) {
            total_profit_loss += profits.raw;
            if profits.percent > Decimal::ZERO {
                wins += 1;
            }
            if best_trade
                .as_ref()
                .map_or(true, |best| profits.percent > best.profit_percent)
            {
                best_trade = Some(BestTrade {
                    symbol: position.symbol.clone(),
                    profit_percent: profits.percent,
                });
            }
        }

        let win_rate = if closed.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(wins as u64) * Decimal::ONE_HUNDRED / Decimal::from(closed.len() as u64)
        };

        Self {
            closed_trades: closed.len(),
            win_rate,
            total_profit_loss,
            account_balance: initial_balance + total_profit_loss,
            best_trade,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyStatus {
    pub kill_switch: bool,
    pub daily_loss_limit_reached: bool,
    pub daily_profit_loss: Decimal,
    pub daily_loss_limit: Decimal,
    pub max_position_size: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub dry_run: bool,
    pub strategy: String,
    pub start_time: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub total_trades: usize,
    pub win_rate: Decimal,
    pub total_profit_loss: Decimal,
    pub account_balance: Decimal,
    pub best_trade: Option<BestTrade>,
    pub active_pairs_count: usize,
    pub total_pairs_count: usize,
    pub open_positions: usize,
    pub safety: SafetyStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyInfo {
    pub name: String,
    pub description: String,
}

/// What one trading cycle did
#[derive(Debug, Default)]
pub struct CycleReport {
    pub refreshed_symbols: usize,
    pub opened: Vec<Position>,
    pub closed: Vec<Position>,
    pub failed_closes: Vec<CloseFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForceTradeOutcome {
    Executed {
        symbol: String,
        analysis: SignalResult,
        position: Position,
    },
    /// The requested symbol has no usable market data yet
    NoViableData(String),
    /// No candidate scored high enough
    NoOpportunity,
}

/// Drives the trading loop: refresh data, run exits, score entries, open positions.
pub struct TradingBot {
    config: Config,
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Arc<dyn Strategy>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<PositionEvent>,
    running: AtomicBool,
    cycle_in_flight: AtomicBool,
    kill_switch: AtomicBool,
    loss_limit_reached: AtomicBool,
    shutdown: Notify,
}

impl TradingBot {
    pub fn new(config: Config, gateway: Arc<dyn ExchangeGateway>, strategy: Arc<dyn Strategy>) -> Self {
        let positions = PositionManager::new(strategy.clone(), gateway.clone(), config.trading.dry_run);
        let events = positions.event_sender();
        let market = MarketDataProcessor::new(config.indicators.clone());
        let daily = DailyLossGuard::new(
            config.safety.daily_loss_limit,
            config.trading.account_balance,
            Utc::now().date_naive(),
        );

        Self {
            config,
            gateway,
            strategy,
            state: Mutex::new(EngineState {
                positions,
                market,
                daily,
                started_at: None,
            }),
            events,
            running: AtomicBool::new(false),
            cycle_in_flight: AtomicBool::new(false),
            kill_switch: AtomicBool::new(false),
            loss_limit_reached: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Subscribe to position open/close events
    pub fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn strategy_info(&self) -> StrategyInfo {
        StrategyInfo {
            name: self.strategy.name().to_string(),
            description: self.strategy.description().to_string(),
        }
    }

    /// Why trading is currently blocked, if it is.
    fn halt_reason(&self) -> Option<&'static str> {
        if self.kill_switch.load(Ordering::SeqCst) {
            Some("kill switch is activated")
        } else if self.loss_limit_reached.load(Ordering::SeqCst) {
            Some("daily loss limit reached")
        } else {
            None
        }
    }

    /// Mark the bot running. Returns `false` if it already was or a safety stop is active.
    pub async fn start(&self) -> bool {
        if self.is_running() {
            log::warn!("Trading bot is already running");
            return false;
        }
        if let Some(reason) = self.halt_reason() {
            log::error!("Cannot start trading bot: {}", reason);
            return false;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("Trading bot is already running");
            return false;
        }

        self.state.lock().await.started_at = Some(Utc::now());
        log::info!(
            "Trading bot started: {} symbols, strategy {}, dry run {}",
            self.config.trading.symbols.len(),
            self.strategy.name(),
            self.config.trading.dry_run
        );
        true
    }

    pub fn pause(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            log::warn!("Trading bot is already paused");
            return false;
        }
        log::info!("Trading bot paused");
        true
    }

    pub fn resume(&self) -> bool {
        if self.is_running() {
            log::warn!("Trading bot is already running");
            return false;
        }
        if let Some(reason) = self.halt_reason() {
            log::error!("Cannot resume trading bot: {}", reason);
            return false;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("Trading bot is already running");
            return false;
        }
        log::info!("Trading bot resumed");
        true
    }

    /// Pause trading and refuse to start, resume or force trades until deactivated.
    pub fn activate_kill_switch(&self) {
        log::warn!("Kill switch activated, stopping all trading activity");
        self.kill_switch.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Lift the kill switch. The bot stays paused until resumed.
    pub fn deactivate_kill_switch(&self) {
        self.kill_switch.store(false, Ordering::SeqCst);
        log::info!("Kill switch deactivated");
    }

    /// Stop trading and end `run`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
        log::info!("Trading bot stopped");
    }

    /// Start and tick cycles every `cycle_interval_secs` until `stop` is called.
    pub async fn run(self: Arc<Self>) {
        self.start().await;

        let mut ticker = time::interval(Duration::from_secs(self.config.trading.cycle_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if in_flight.as_ref().map_or(false, |cycle| !cycle.is_finished()) {
                        log::warn!("Previous cycle still running, skipping this tick");
                        continue;
                    }
                    let bot = self.clone();
                    in_flight = Some(tokio::spawn(async move {
                        bot.run_cycle().await;
                    }));
                }
                _ = self.shutdown.notified() => break,
            }
        }

        // Let an in-flight cycle finish its orders before returning
        if let Some(cycle) = in_flight {
            if let Err(e) = cycle.await {
                log::error!("Trading cycle ended abnormally: {}", e);
            }
        }
    }

    /// Roll the daily tally over on a new UTC day and pause once the loss limit is hit.
    /// Returns true while the limit is in force.
    fn check_daily_loss(&self, daily: &mut DailyLossGuard, positions: &PositionManager) -> bool {
        let today = Utc::now().date_naive();
        if today != daily.day() {
            let balance = TradeStats::from_history(
                &positions.closed_positions(),
                self.config.trading.account_balance,
            )
            .account_balance;
            daily.roll_day(today, balance);
            self.loss_limit_reached.store(false, Ordering::SeqCst);
        }

        if !daily.limit_reached() {
            return false;
        }
        if !self.loss_limit_reached.swap(true, Ordering::SeqCst) {
            log::warn!(
                "Daily loss limit reached: {}% (limit: {}%)",
                (daily.loss_fraction() * Decimal::ONE_HUNDRED).round_dp(2),
                daily.limit() * Decimal::ONE_HUNDRED
            );
            self.running.store(false, Ordering::SeqCst);
        }
        true
    }

    /// One full cycle. Returns `None` when paused, when a safety stop is in force,
    /// or when another cycle is still running. Readers holding the engine only delay it.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        if self.cycle_in_flight.swap(true, Ordering::SeqCst) {
            log::warn!("Previous cycle still running, skipping this one");
            return None;
        }
        let _in_flight = CycleGuard(&self.cycle_in_flight);

        let mut state = self.state.lock().await;
        let EngineState {
            positions,
            market,
            daily,
            ..
        } = &mut *state;

        if self.check_daily_loss(daily, positions) || !self.is_running() {
            return None;
        }

        log::info!("Cycle started at {}", Utc::now().to_rfc3339());
        let trading = &self.config.trading;

        let fresh = market
            .refresh(
                self.gateway.as_ref(),
                &trading.symbols,
                &trading.interval,
                trading.candle_limit,
                trading.fetch_concurrency,
            )
            .await;

        let update = positions.update(&fresh).await;
        for closed in &update.closed {
            daily.record(closed);
        }

        let mut opened = Vec::new();
        // No new entries once the day's loss limit trips
        let candidates: &[String] = if self.check_daily_loss(daily, positions) {
            &[]
        } else {
            &trading.symbols
        };
        for symbol in candidates {
            if !self.is_running() {
                log::warn!("Trading paused mid-cycle, no further entries");
                break;
            }
            if positions.has_open_position(symbol) {
                continue;
            }
            let snapshot = match fresh.get(symbol) {
                Some(snapshot) => snapshot,
                None => continue,
            };

            let analysis = self.strategy.analyze(symbol, snapshot);
            if analysis.signal != SignalKind::Buy {
                continue;
            }

            log::info!("{} signal strength {}/5, opening position", symbol, analysis.score);
            match self.execute_buy(positions, symbol, snapshot).await {
                Ok(position) => opened.push(position),
                Err(e) => log::error!("Error opening position for {}: {}", symbol, e),
            }
        }

        Some(CycleReport {
            refreshed_symbols: fresh.len(),
            opened,
            closed: update.closed,
            failed_closes: update.failed,
        })
    }

    /// Buy through the exchange (or simulate it) and record the position.
    async fn execute_buy(
        &self,
        positions: &mut PositionManager,
        symbol: &str,
        snapshot: &MarketSnapshot,
    ) -> TradingResult<Position> {
        let price = snapshot
            .current_price()
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| TradingError::Signal(format!("No price for {}", symbol)))?;

        let usdt = safety::cap_position_size(
            self.strategy.calculate_position_size(
                self.config.trading.account_balance,
                self.config.risk.risk_percent,
                Some(snapshot),
            ),
            self.config.safety.max_position_size,
        );
        if usdt <= Decimal::ZERO {
            return Err(TradingError::Strategy(format!(
                "Position size for {} is not positive: {}",
                symbol, usdt
            )));
        }

        let estimated_qty = usdt / price;
        let (entry_price, quantity) = if self.config.trading.dry_run {
            log::info!("[DRY RUN] Would buy {} USDT of {} at {}", usdt, symbol, price);
            (price, estimated_qty)
        } else {
            let fill = self.gateway.place_market_buy(symbol, usdt).await?;
            log::info!("Buy order {} filled for {}", fill.order_id, symbol);
            (
                fill.fill_price.unwrap_or(price),
                fill.executed_qty.unwrap_or(estimated_qty),
            )
        };

        positions.open(symbol, entry_price, quantity, Some(snapshot))
    }

    /// Open a position outside the normal signal flow.
    ///
    /// With a symbol, the position opens whatever the score. Without one, the best
    /// scoring symbol that has no open position is used if it scores above 1.
    pub async fn force_trade(&self, symbol: Option<&str>) -> TradingResult<ForceTradeOutcome> {
        if let Some(reason) = self.halt_reason() {
            return Err(TradingError::Halted(reason.to_string()));
        }

        let mut state = self.state.lock().await;
        let EngineState {
            positions, market, ..
        } = &mut *state;

        let (symbol, mut analysis) = match symbol {
            Some(symbol) => {
                if positions.has_open_position(symbol) {
                    return Err(TradingError::DuplicatePosition(symbol.to_string()));
                }
                let snapshot = match market.get_latest(symbol).filter(|s| s.has_enough_data()) {
                    Some(snapshot) => snapshot,
                    None => {
                        log::warn!("Force trade: no viable data for {}", symbol);
                        return Ok(ForceTradeOutcome::NoViableData(symbol.to_string()));
                    }
                };
                (symbol.to_string(), self.strategy.analyze(symbol, snapshot))
            }
            None => {
                let mut best: Option<SignalResult> = None;
                for candidate in &self.config.trading.symbols {
                    if positions.has_open_position(candidate) {
                        continue;
                    }
                    let snapshot = match market.get_latest(candidate) {
                        Some(snapshot) if snapshot.has_enough_data() => snapshot,
                        _ => continue,
                    };
                    let analysis = self.strategy.analyze(candidate, snapshot);
                    if best.as_ref().map_or(true, |b| analysis.score > b.score) {
                        best = Some(analysis);
                    }
                }

                match best {
                    Some(best) if best.score > FORCE_TRADE_MIN_SCORE => (best.symbol.clone(), best),
                    _ => {
                        log::info!("Force trade: no viable trading opportunities found");
                        return Ok(ForceTradeOutcome::NoOpportunity);
                    }
                }
            }
        };

        let snapshot = match market.get_latest(&symbol) {
            Some(snapshot) => snapshot,
            None => return Ok(ForceTradeOutcome::NoViableData(symbol)),
        };

        analysis.signal = SignalKind::ForceBuy;
        log::info!("Force trade for {} (score {}/5)", symbol, analysis.score);
        let position = self.execute_buy(positions, &symbol, snapshot).await?;

        Ok(ForceTradeOutcome::Executed {
            symbol,
            analysis,
            position,
        })
    }

    /// Close a position at the last cached price.
    pub async fn close_position(&self, symbol: &str) -> TradingResult<Option<Position>> {
        let mut state = self.state.lock().await;
        if !state.positions.has_open_position(symbol) {
            return Ok(None);
        }

        let price = state.market.latest_price(symbol).ok_or_else(|| {
            TradingError::PositionManagement(format!("No market price to close {}", symbol))
        })?;

        let closed = state
            .positions
            .close(symbol, price, CloseReason::ManualClose)
            .await?;
        if let Some(position) = &closed {
            state.daily.record(position);
        }
        Ok(closed)
    }

    /// Close every open position at its last cached price.
    ///
    /// A position that cannot be closed is logged and left open; the rest still close.
    pub async fn emergency_close_all(&self) -> Vec<Position> {
        log::warn!("Emergency closing all positions");
        let mut state = self.state.lock().await;
        let EngineState {
            positions,
            market,
            daily,
            ..
        } = &mut *state;

        let mut symbols: Vec<String> = positions.get_open_positions().into_keys().collect();
        symbols.sort();

        let mut closed = Vec::new();
        for symbol in &symbols {
            let price = match market.latest_price(symbol) {
                Some(price) => price,
                None => {
                    log::error!("Error closing position for {}: no market price", symbol);
                    continue;
                }
            };
            match positions.close(symbol, price, CloseReason::ManualClose).await {
                Ok(Some(position)) => {
                    daily.record(&position);
                    closed.push(position);
                }
                Ok(None) => {}
                Err(e) => log::error!("Error closing position for {}: {}", symbol, e),
            }
        }

        log::info!("Emergency closed {}/{} positions", closed.len(), symbols.len());
        closed
    }

    pub async fn status(&self) -> BotStatus {
        let state = self.state.lock().await;
        let closed = state.positions.closed_positions();
        let stats = TradeStats::from_history(&closed, self.config.trading.account_balance);
        let open_positions = state.positions.open_count();

        let uptime_secs = state
            .started_at
            .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
            .unwrap_or(0);

        BotStatus {
            running: self.is_running(),
            dry_run: self.config.trading.dry_run,
            strategy: self.strategy.name().to_string(),
            start_time: state.started_at,
            uptime_secs,
            total_trades: closed.len() + open_positions,
            win_rate: stats.win_rate,
            total_profit_loss: stats.total_profit_loss,
            account_balance: stats.account_balance,
            best_trade: stats.best_trade,
            active_pairs_count: state.market.snapshots().len(),
            total_pairs_count: self.config.trading.symbols.len(),
            open_positions,
            safety: SafetyStatus {
                kill_switch: self.kill_switch.load(Ordering::SeqCst),
                daily_loss_limit_reached: self.loss_limit_reached.load(Ordering::SeqCst),
                daily_profit_loss: state.daily.realized(),
                daily_loss_limit: state.daily.limit(),
                max_position_size: self.config.safety.max_position_size,
            },
        }
    }

    pub async fn stats(&self) -> TradeStats {
        let state = self.state.lock().await;
        TradeStats::from_history(
            &state.positions.closed_positions(),
            self.config.trading.account_balance,
        )
    }

    pub async fn open_positions(&self) -> HashMap<String, Position> {
        self.state.lock().await.positions.get_open_positions()
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.state.lock().await.positions.get_open_position(symbol)
    }

    pub async fn position_history(&self) -> Vec<Position> {
        self.state.lock().await.positions.closed_positions()
    }

    pub async fn market_snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.state.lock().await.market.get_latest(symbol).cloned()
    }
}
