//! Booking aggregate
//!
//! A booking is a reservation of a provider's time by a client. It owns its
//! service lines and time slots and moves through [`BookingStatus`] only via
//! the lifecycle service.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::booking_type::BookingType;
use super::payment::{RefundOutcome, SettlementOutcome};
use super::slot::TimeSlot;

/// Booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created, waiting for the provider
    #[default]
    Pending,
    /// Accepted by the provider
    Confirmed,
    /// Service is being delivered
    InProgress,
    /// Service delivered
    Completed,
    /// Cancelled by the client
    CancelledByClient,
    /// Cancelled by the provider or on the provider's behalf
    CancelledByProvider,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::InProgress => write!(f, "in_progress"),
            BookingStatus::Completed => write!(f, "completed"),
            BookingStatus::CancelledByClient => write!(f, "cancelled_by_client"),
            BookingStatus::CancelledByProvider => write!(f, "cancelled_by_provider"),
        }
    }
}

impl BookingStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "in_progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            "cancelled_by_client" => Some(BookingStatus::CancelledByClient),
            "cancelled_by_provider" => Some(BookingStatus::CancelledByProvider),
            _ => None,
        }
    }

    /// Terminal states never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::CancelledByClient
                | BookingStatus::CancelledByProvider
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            BookingStatus::CancelledByClient | BookingStatus::CancelledByProvider
        )
    }

    /// Cancellable without `force`
    pub fn can_be_cancelled(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_be_rescheduled(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::InProgress)
    }

    /// Statuses reachable from this one
    pub fn next_possible(&self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[
                BookingStatus::Confirmed,
                BookingStatus::CancelledByClient,
                BookingStatus::CancelledByProvider,
            ],
            BookingStatus::Confirmed => &[
                BookingStatus::InProgress,
                BookingStatus::Completed,
                BookingStatus::CancelledByClient,
                BookingStatus::CancelledByProvider,
            ],
            BookingStatus::InProgress => &[
                BookingStatus::Completed,
                BookingStatus::CancelledByClient,
                BookingStatus::CancelledByProvider,
            ],
            BookingStatus::Completed
            | BookingStatus::CancelledByClient
            | BookingStatus::CancelledByProvider => &[],
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        self.next_possible().contains(&next)
    }
}

/// Type-specific contact and location details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub client_address: Option<String>,
    pub client_phone: Option<String>,
    pub provider_address: Option<String>,
    pub platform: Option<String>,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
}

/// One service inside a bundle booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingServiceLine {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub service_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub duration_minutes: i32,
    /// Minutes from booking start at which this service begins
    pub start_offset_minutes: i32,
    pub sort_order: i32,
    pub notes: Option<String>,
}

/// Bonuses granted when a booking completes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionBonuses {
    pub client_cashback: Decimal,
    pub loyalty_points: i64,
    pub provider_quality_bonus: Decimal,
}

/// Booking entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,

    /// Human-facing unique number (e.g. `BK20261019-7Q2XKA`)
    pub booking_number: String,

    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Uuid,

    pub booking_type: BookingType,
    pub status: BookingStatus,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,

    // Money
    pub base_price: Decimal,
    pub service_price: Decimal,
    pub delivery_fee: Decimal,
    pub discount_amount: Decimal,
    pub deposit_amount: Decimal,
    pub total_price: Decimal,
    pub paid_amount: Decimal,

    /// Gateway reference of the captured payment, if any
    pub payment_reference: Option<String>,

    pub details: BookingDetails,

    // Cancellation
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub cancellation_fee_amount: Option<Decimal>,
    pub cancellation_fee_percent: Option<Decimal>,
    pub refund_outcome: Option<RefundOutcome>,

    // Completion
    pub completed_at: Option<DateTime<Utc>>,
    pub service_quality: Option<i16>,
    pub completion_notes: Option<String>,
    pub bonuses: Option<CompletionBonuses>,
    pub review_available_until: Option<DateTime<Utc>>,
    pub settlement: Option<SettlementOutcome>,

    /// Times the booking was moved to another window
    pub reschedule_count: i32,

    pub service_lines: Vec<BookingServiceLine>,
    pub slots: Vec<TimeSlot>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Time left until the booking starts (negative once started)
    pub fn time_until_start(&self, now: DateTime<Utc>) -> Duration {
        self.start_time - now
    }

    /// Whether `user_id` is the client of this booking
    #[inline]
    pub fn is_client(&self, user_id: Uuid) -> bool {
        self.client_id == user_id
    }

    /// Whether `user_id` is the provider of this booking
    #[inline]
    pub fn is_provider(&self, user_id: Uuid) -> bool {
        self.provider_id == user_id
    }

    /// Outstanding amount still to be paid
    pub fn outstanding(&self) -> Decimal {
        (self.total_price - self.paid_amount).max(Decimal::ZERO)
    }
}

/// Everything needed to persist a new booking in one unit
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking: Booking,
    pub slots: Vec<TimeSlot>,
    pub service_lines: Vec<BookingServiceLine>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::CancelledByClient.is_terminal());
        assert!(BookingStatus::CancelledByProvider.is_terminal());
        assert!(!BookingStatus::InProgress.is_terminal());
        assert!(BookingStatus::Completed.next_possible().is_empty());
    }

    #[test]
    fn test_cancellable_statuses() {
        assert!(BookingStatus::Pending.can_be_cancelled());
        assert!(BookingStatus::Confirmed.can_be_cancelled());
        assert!(!BookingStatus::InProgress.can_be_cancelled());
        assert!(!BookingStatus::Completed.can_be_cancelled());
        assert!(BookingStatus::Confirmed.can_be_rescheduled());
        assert!(!BookingStatus::InProgress.can_be_rescheduled());
    }

    #[test]
    fn test_transitions() {
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Confirmed));
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::InProgress));
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::InProgress));
        assert!(BookingStatus::InProgress.can_transition_to(BookingStatus::Completed));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            BookingStatus::from_str("cancelled_by_provider"),
            Some(BookingStatus::CancelledByProvider)
        );
        assert_eq!(BookingStatus::from_str("no_show"), None);
    }
}
