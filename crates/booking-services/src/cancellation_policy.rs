//! Cancellation fee policy
//!
//! The fee is a percentage of the booking total. Cancelling early enough is
//! free; late cancellations and provider-side cancellations raise the
//! percentage, each capped at 100.

use booking_core::config::CancellationConfig;
use booking_core::models::{percent_of, Booking, BookingCapabilities, CancellationSide};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

const FULL: Decimal = dec!(100);

/// Computed cancellation fee
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeResult {
    pub amount: Decimal,
    /// Percentage of the total that was charged (0-100)
    pub percent_applied: Decimal,
}

impl FeeResult {
    pub fn none() -> Self {
        Self {
            amount: Decimal::ZERO,
            percent_applied: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancellationPolicy {
    config: CancellationConfig,
}

impl CancellationPolicy {
    pub fn new(config: CancellationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CancellationConfig {
        &self.config
    }

    pub fn compute_fee(
        &self,
        booking: &Booking,
        side: CancellationSide,
        now: DateTime<Utc>,
    ) -> FeeResult {
        let base = booking.total_price;
        if base <= Decimal::ZERO {
            return FeeResult::none();
        }

        let until_start = booking.time_until_start(now);
        if until_start >= Duration::hours(self.config.free_cancellation_hours) {
            return FeeResult::none();
        }

        let mut percent = booking.booking_type.cancellation_fee_percent();

        if until_start < Duration::hours(self.config.late_cancellation_hours) {
            percent = (percent * self.config.late_multiplier).min(FULL);
        }

        if side == CancellationSide::Provider {
            percent = (percent * self.config.provider_multiplier).min(FULL);
        }

        FeeResult {
            amount: percent_of(base, percent),
            percent_applied: percent.normalize(),
        }
    }
}
