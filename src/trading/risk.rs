// src/trading/risk.rs
//! Position sizing and exit level arithmetic shared by the strategies and the
//! position manager. Everything here is pure `Decimal` math.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Stop distance in ATR multiples
pub const ATR_STOP_MULTIPLIER: Decimal = dec!(1.5);

/// Target distance in ATR multiples
pub const ATR_TARGET_MULTIPLIER: Decimal = dec!(2.5);

/// Smallest fraction of the base size a volatile market can shrink a position to
pub const MIN_VOLATILITY_FACTOR: Decimal = dec!(0.5);

/// Gain over entry (as a fraction) the high-water mark must exceed before the stop moves up
pub const STOP_TIGHTEN_THRESHOLD: Decimal = dec!(0.02);

/// Share of the open gain locked in by a tightened stop
pub const STOP_LOCK_IN_RATIO: Decimal = dec!(0.1);

pub fn fixed_stop_loss(entry_price: Decimal, stop_loss_pct: Decimal) -> Decimal {
    entry_price * (Decimal::ONE - stop_loss_pct)
}

pub fn fixed_take_profit(entry_price: Decimal, take_profit_pct: Decimal) -> Decimal {
    entry_price * (Decimal::ONE + take_profit_pct)
}

/// The tighter of the percent stop and the ATR stop.
pub fn atr_stop_loss(entry_price: Decimal, stop_loss_pct: Decimal, atr: Decimal) -> Decimal {
    fixed_stop_loss(entry_price, stop_loss_pct).max(entry_price - atr * ATR_STOP_MULTIPLIER)
}

/// The closer of the percent target and the ATR target.
pub fn atr_take_profit(entry_price: Decimal, take_profit_pct: Decimal, atr: Decimal) -> Decimal {
    fixed_take_profit(entry_price, take_profit_pct).min(entry_price + atr * ATR_TARGET_MULTIPLIER)
}

/// Shrink `base` when ATR runs above the threshold, never below half of it.
pub fn volatility_adjusted_size(base: Decimal, atr: Option<Decimal>, atr_threshold: Decimal) -> Decimal {
    match atr {
        Some(atr) if atr > atr_threshold && atr > Decimal::ZERO => {
            let factor = (atr_threshold / atr).clamp(MIN_VOLATILITY_FACTOR, Decimal::ONE);
            base * factor
        }
        _ => base,
    }
}

/// Raised stop for a position in profit, or `None` when it should stay put.
///
/// Applies only once the high-water mark is more than 2% above entry and the
/// current price is above entry. The result is never lower than `current_stop`.
pub fn tightened_stop(
    entry_price: Decimal,
    highest_price: Decimal,
    current_price: Decimal,
    current_stop: Decimal,
) -> Option<Decimal> {
    if entry_price <= Decimal::ZERO || current_price <= entry_price {
        return None;
    }

    let gain = highest_price - entry_price;
    if gain / entry_price <= STOP_TIGHTEN_THRESHOLD {
        return None;
    }

    let candidate = entry_price + gain * STOP_LOCK_IN_RATIO;
    if candidate > current_stop {
        Some(candidate)
    } else {
        None
    }
}

/// Price below which the trailing stop fires.
pub fn trailing_trigger(highest_price: Decimal, trailing_stop_pct: Decimal) -> Decimal {
    highest_price * (Decimal::ONE - trailing_stop_pct)
}
