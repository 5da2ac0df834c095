//! Monetary helpers

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Round to cents, half away from zero
#[inline]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * percent / 100`, rounded to cents
#[inline]
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    round_money(amount * percent / dec!(100))
}
