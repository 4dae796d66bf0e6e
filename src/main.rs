// src/main.rs
use signal_trader::config::Config;
use signal_trader::domain::errors::{AppError, AppResult};
use signal_trader::domain::models::PositionAction;
use signal_trader::exchange::client::ExchangeGateway;
use signal_trader::exchange::mexc::MexcGateway;
use signal_trader::trading::strategies::{FixedRiskStrategy, MultiSignalStrategy, Strategy};
use signal_trader::trading::TradingBot;

use std::sync::Arc;
use tokio::signal::ctrl_c;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, interval};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let mut config = Config::from_env()?;

    // Initialize logging
    config.init_logging()?;
    config.validate()?;

    log::info!("Starting signal_trader v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using {} exchange at {}", config.exchange.name, config.exchange.base_url);
    if config.trading.dry_run {
        log::info!("Dry run enabled: orders are simulated");
    }

    // Create exchange client
    let gateway = create_gateway(&config)?;
    let strategy = create_strategy(&config)?;

    // Make sure the exchange answers before the first cycle
    if let Some(symbol) = config.trading.symbols.first() {
        let history = gateway.get_klines(symbol, &config.trading.interval, 1).await?;
        log::info!("Exchange reachable: {} candle(s) received for {}", history.len(), symbol);
    }

    log::info!("Strategy: {} - {}", strategy.name(), strategy.description());

    let bot = Arc::new(TradingBot::new(config.clone(), gateway, strategy));

    // Log position transitions
    let mut events = bot.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.action {
                    PositionAction::Open => log::info!(
                        "[OPEN] {} qty {} @ {}",
                        event.symbol,
                        event.position.quantity,
                        event.position.entry_price
                    ),
                    PositionAction::Close => {
                        let reason = event
                            .position
                            .close_reason
                            .map(|r| r.to_string())
                            .unwrap_or_default();
                        let pnl = event.position.profits.map(|p| p.percent.round_dp(2));
                        log::info!("[CLOSE] {} {} P/L {:?}%", event.symbol, reason, pnl);
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Position event listener lagged, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Periodic status report
    let status_bot = bot.clone();
    let report_every = Duration::from_secs(config.trading.cycle_interval_secs.max(1) * 5);
    tokio::spawn(async move {
        let mut ticker = interval(report_every);
        loop {
            ticker.tick().await;
            let status = status_bot.status().await;
            log::info!(
                "=== Status === running: {}, open: {}, trades: {}, win rate: {}%, P/L: {} USDT, balance: {} USDT",
                status.running,
                status.open_positions,
                status.total_trades,
                status.win_rate.round_dp(2),
                status.total_profit_loss.round_dp(4),
                status.account_balance.round_dp(2)
            );
            if status.safety.kill_switch || status.safety.daily_loss_limit_reached {
                log::warn!(
                    "Trading halted: kill switch {}, daily loss limit reached {} (today's P/L {} USDT)",
                    status.safety.kill_switch,
                    status.safety.daily_loss_limit_reached,
                    status.safety.daily_profit_loss.round_dp(4)
                );
            }
        }
    });

    let runner = tokio::spawn(bot.clone().run());

    // Wait for shutdown signal
    log::info!("Bot is running. Press Ctrl+C to stop.");
    ctrl_c().await?;

    // Shutdown
    log::info!("Shutting down...");
    bot.stop();
    if let Err(e) = runner.await {
        log::error!("Trading loop ended abnormally: {}", e);
    }

    let open = bot.open_positions().await;
    if !open.is_empty() {
        log::warn!("{} positions left open: {:?}", open.len(), open.keys().collect::<Vec<_>>());
    }

    log::info!("Shutdown complete. Goodbye!");
    Ok(())
}

/// Create exchange client based on configuration
fn create_gateway(config: &Config) -> AppResult<Arc<dyn ExchangeGateway>> {
    match config.exchange.name.to_lowercase().as_str() {
        "mexc" => Ok(Arc::new(MexcGateway::new(&config.exchange))),
        _ => Err(AppError::Config(format!(
            "Unsupported exchange: {}",
            config.exchange.name
        ))),
    }
}

fn create_strategy(config: &Config) -> AppResult<Arc<dyn Strategy>> {
    match config.trading.strategy.as_str() {
        "multi_signal" => Ok(Arc::new(MultiSignalStrategy::new(config.risk.clone()))),
        "fixed_risk" => Ok(Arc::new(FixedRiskStrategy::new(config.risk.clone()))),
        other => Err(AppError::Config(format!("Unsupported strategy: {}", other))),
    }
}
