//! State change records handed to the repository
//!
//! Each record describes one atomic write. The repository applies it only if
//! the booking is still in `expected_status`, which makes concurrent or
//! repeated transitions fail instead of applying twice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::booking::{BookingStatus, CompletionBonuses};
use super::slot::TimeSlot;

/// Plain status move (confirm, start)
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub booking_id: Uuid,
    pub expected_status: BookingStatus,
    pub new_status: BookingStatus,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    /// Verb used in state errors
    pub fn operation(&self) -> &'static str {
        match self.new_status {
            BookingStatus::Confirmed => "confirm",
            BookingStatus::InProgress => "start",
            BookingStatus::Completed => "complete",
            BookingStatus::CancelledByClient | BookingStatus::CancelledByProvider => "cancel",
            BookingStatus::Pending => "reopen",
        }
    }
}

/// Cancellation write: status, metadata and slot release
#[derive(Debug, Clone)]
pub struct CancellationRecord {
    pub booking_id: Uuid,
    pub expected_status: BookingStatus,
    pub new_status: BookingStatus,
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: Uuid,
    pub reason: String,
    pub fee_amount: Decimal,
    pub fee_percent: Decimal,
}

/// Completion write: status, metadata, statistics and review window
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub booking_id: Uuid,
    pub expected_status: BookingStatus,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub quality: Option<i16>,
    pub notes: Option<String>,
    pub bonuses: CompletionBonuses,
    pub client_spent: Decimal,
    pub provider_net_earnings: Decimal,
    pub review_available_until: DateTime<Utc>,
}

/// Reschedule write: new window and slot swap.
///
/// Applies only while the booking still has `expected_status` and has been
/// moved exactly `expected_count` times.
#[derive(Debug, Clone)]
pub struct RescheduleRecord {
    pub booking_id: Uuid,
    pub provider_id: Uuid,
    pub expected_status: BookingStatus,
    pub expected_count: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub slots: Vec<TimeSlot>,
    pub rescheduled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_change_operation() {
        let change = StatusChange {
            booking_id: Uuid::new_v4(),
            expected_status: BookingStatus::Confirmed,
            new_status: BookingStatus::InProgress,
            at: Utc::now(),
        };
        assert_eq!(change.operation(), "start");
    }
}
