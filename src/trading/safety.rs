// src/trading/safety.rs
use crate::domain::models::Position;
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Clamp a buy amount to the configured maximum.
pub fn cap_position_size(size: Decimal, max_position_size: Decimal) -> Decimal {
    if size > max_position_size {
        log::info!(
            "Position size {} USDT reduced to maximum {} USDT",
            size.round_dp(2),
            max_position_size
        );
        max_position_size
    } else {
        size
    }
}

/// Realized profit and loss for the current UTC day, measured against the
/// balance the day started with.
#[derive(Debug, Clone)]
pub struct DailyLossGuard {
    limit: Decimal,
    day: NaiveDate,
    start_balance: Decimal,
    realized: Decimal,
}

impl DailyLossGuard {
    /// `limit` is a negative fraction, e.g. -0.10 for a 10% daily loss.
    pub fn new(limit: Decimal, start_balance: Decimal, today: NaiveDate) -> Self {
        Self {
            limit,
            day: today,
            start_balance,
            realized: Decimal::ZERO,
        }
    }

    pub fn record(&mut self, closed: &Position) {
        if let Some(profits) = closed.profits {
            self.realized += profits.raw;
        }
    }

    /// Start a new day if the date changed. Returns true when it did.
    pub fn roll_day(&mut self, today: NaiveDate, balance: Decimal) -> bool {
        if today == self.day {
            return false;
        }
        log::info!(
            "New trading day {}: daily P/L reset (previous {} USDT)",
            today,
            self.realized.round_dp(4)
        );
        self.day = today;
        self.start_balance = balance;
        self.realized = Decimal::ZERO;
        true
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn realized(&self) -> Decimal {
        self.realized
    }

    /// Realized P/L as a fraction of the starting balance
    pub fn loss_fraction(&self) -> Decimal {
        if self.start_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.realized / self.start_balance
    }

    pub fn limit_reached(&self) -> bool {
        self.loss_fraction() <= self.limit
    }

    pub fn limit(&self) -> Decimal {
        self.limit
    }
}
