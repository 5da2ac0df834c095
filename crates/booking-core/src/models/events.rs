//! Events published to the notification port

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actor::CancellationSide;
use super::booking::CompletionBonuses;
use super::payment::RefundOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BookingEvent {
    BookingRequested,
    BookingConfirmed,
    BookingStarted,
    BookingRescheduled {
        previous_start: DateTime<Utc>,
        previous_end: DateTime<Utc>,
    },
    BookingCancelled {
        actor_id: Uuid,
        side: CancellationSide,
        fee: Decimal,
        refund_outcome: RefundOutcome,
    },
    /// Staff alert for cancellations whose fee exceeds the configured threshold
    HighFeeCancellation { actor_id: Uuid, fee: Decimal },
    BookingCompleted {
        quality: Option<i16>,
        bonuses: CompletionBonuses,
    },
}

impl BookingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BookingEvent::BookingRequested => "booking_requested",
            BookingEvent::BookingConfirmed => "booking_confirmed",
            BookingEvent::BookingStarted => "booking_started",
            BookingEvent::BookingRescheduled { .. } => "booking_rescheduled",
            BookingEvent::BookingCancelled { .. } => "booking_cancelled",
            BookingEvent::HighFeeCancellation { .. } => "high_fee_cancellation",
            BookingEvent::BookingCompleted { .. } => "booking_completed",
        }
    }
}
