mod common;

use common::{flat_closes, history, oversold_closes, test_config, ScriptedGateway};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use signal_trader::config::Config;
use signal_trader::domain::errors::TradingError;
use signal_trader::domain::models::CloseReason;
use signal_trader::trading::orchestrator::{ForceTradeOutcome, TradingBot};
use signal_trader::trading::strategies::MultiSignalStrategy;
use std::sync::Arc;

const OVERSOLD: &str = "DIPUSDT";
const FLAT: &str = "FLATUSDT";

fn bot_with(config: Config) -> (TradingBot, Arc<ScriptedGateway>) {
    let gateway = ScriptedGateway::new();
    gateway.set_klines(history(OVERSOLD, &oversold_closes()));
    gateway.set_klines(history(FLAT, &flat_closes()));

    let strategy = Arc::new(MultiSignalStrategy::new(config.risk.clone()));
    (TradingBot::new(config, gateway.clone(), strategy), gateway)
}

fn config(dry_run: bool) -> Config {
    test_config(&[OVERSOLD, FLAT], dry_run)
}

#[tokio::test]
async fn kill_switch_blocks_trading_until_lifted() {
    let (bot, gateway) = bot_with(config(false));
    assert!(bot.start().await);

    bot.activate_kill_switch();
    assert!(!bot.is_running());
    assert!(!bot.resume());
    assert!(!bot.start().await);
    assert!(bot.run_cycle().await.is_none());
    assert!(matches!(
        bot.force_trade(Some(OVERSOLD)).await,
        Err(TradingError::Halted(_))
    ));
    assert!(bot.status().await.safety.kill_switch);
    assert_eq!(gateway.buy_count(), 0);

    // Lifting it does not restart trading by itself
    bot.deactivate_kill_switch();
    assert!(!bot.is_running());
    assert!(bot.resume());

    let report = bot.run_cycle().await.unwrap();
    assert_eq!(report.opened.len(), 1);
    assert!(!bot.status().await.safety.kill_switch);
}

#[tokio::test]
async fn buys_are_capped_at_the_max_position_size() {
    let mut config = config(false);
    config.safety.max_position_size = dec!(0.5);
    let (bot, gateway) = bot_with(config);
    bot.start().await;

    let report = bot.run_cycle().await.unwrap();
    // The volatility-adjusted size of 0.75 USDT is cut to 0.5
    assert_eq!(gateway.buy_amounts(), vec![dec!(0.5)]);
    assert_eq!(report.opened[0].quantity, dec!(0.5) / dec!(127));
    assert_eq!(bot.status().await.safety.max_position_size, dec!(0.5));
}

#[tokio::test]
async fn sizes_under_the_cap_are_untouched() {
    let (bot, gateway) = bot_with(config(false));
    bot.start().await;

    bot.run_cycle().await.unwrap();
    assert_eq!(gateway.buy_amounts(), vec![dec!(0.75)]);
}

#[tokio::test]
async fn daily_loss_limit_pauses_trading() {
    let mut config = config(true);
    config.safety.daily_loss_limit = dec!(-0.001);
    let (bot, gateway) = bot_with(config);
    bot.start().await;

    let report = bot.run_cycle().await.unwrap();
    assert_eq!(report.opened.len(), 1);

    // Crash through the stop: (100 - 127) * 0.75 / 127 is about -0.16 USDT, over 0.1% of 150
    let mut crash = oversold_closes();
    crash.push(dec!(100));
    gateway.set_klines(history(OVERSOLD, &crash));

    let report = bot.run_cycle().await.unwrap();
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].close_reason, Some(CloseReason::StopLoss));
    assert!(report.opened.is_empty());

    assert!(!bot.is_running());
    let status = bot.status().await;
    assert!(status.safety.daily_loss_limit_reached);
    assert!(status.safety.daily_profit_loss < Decimal::ZERO);
    assert_eq!(status.safety.daily_loss_limit, dec!(-0.001));

    assert!(!bot.resume());
    assert!(!bot.start().await);
    assert!(bot.run_cycle().await.is_none());
    assert!(matches!(bot.force_trade(None).await, Err(TradingError::Halted(_))));
}

#[tokio::test]
async fn small_losses_keep_trading() {
    let (bot, _) = bot_with(config(true));
    bot.start().await;
    bot.run_cycle().await.unwrap();

    let closed = bot.close_position(OVERSOLD).await.unwrap().unwrap();
    assert_eq!(closed.profits.unwrap().raw, Decimal::ZERO);

    assert!(bot.run_cycle().await.is_some());
    assert!(bot.is_running());
    assert!(!bot.status().await.safety.daily_loss_limit_reached);
}

#[tokio::test]
async fn emergency_close_carries_on_past_failures() {
    let (bot, gateway) = bot_with(config(false));
    bot.start().await;
    bot.run_cycle().await.unwrap();
    assert!(matches!(
        bot.force_trade(Some(FLAT)).await.unwrap(),
        ForceTradeOutcome::Executed { .. }
    ));
    assert_eq!(bot.open_positions().await.len(), 2);

    gateway.fail_sells(true);
    assert!(bot.emergency_close_all().await.is_empty());
    assert_eq!(bot.open_positions().await.len(), 2);
    assert_eq!(gateway.sell_count(), 2);

    gateway.fail_sells(false);
    let closed = bot.emergency_close_all().await;
    let symbols: Vec<&str> = closed.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(symbols, vec![OVERSOLD, FLAT]);
    assert!(closed
        .iter()
        .all(|p| p.close_reason == Some(CloseReason::ManualClose)));
    assert!(bot.open_positions().await.is_empty());
    assert_eq!(bot.position_history().await.len(), 2);

    // Nothing left to close
    assert!(bot.emergency_close_all().await.is_empty());
}
