//! Proration arithmetic for mid-cycle plan changes.
//!
//! Pure and side-effect free. The daily rate always divides by 30, for every
//! plan duration including quarterly and yearly; this mirrors the billing
//! policy the engine inherits and must not be replaced with duration-specific
//! divisors. Results are rounded to 2 decimal places with midpoints rounding
//! away from zero.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

/// Fixed divisor applied to every plan price regardless of duration.
const DAILY_RATE_DIVISOR: Decimal = Decimal::from_parts(30, 0, 0, false, 0);

/// Per-day price of a plan.
pub fn daily_rate(price: Decimal) -> Decimal {
    price / DAILY_RATE_DIVISOR
}

/// Whole days left before `end_utc`, clamped at zero once the subscription
/// has lapsed.
pub fn remaining_days(now: DateTime<Utc>, end_utc: DateTime<Utc>) -> i64 {
    (end_utc - now).num_days().max(0)
}

/// Price delta owed when swapping plans with `remaining_days` of unused time.
/// Positive means the subscriber owes more, negative is a credit.
pub fn price_difference(
    current_price: Decimal,
    new_price: Decimal,
    remaining_days: i64,
) -> Decimal {
    let delta = (daily_rate(new_price) - daily_rate(current_price)) * Decimal::from(remaining_days);
    delta.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
