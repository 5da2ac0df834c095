//! Ports for persistence and external collaborators
//!
//! The lifecycle service depends only on these traits. `booking-db` provides
//! PostgreSQL and in-memory implementations of the repositories; gateways and
//! notifiers are supplied by the embedding application.

use crate::models::{
    Booking, BookingEvent, CancellationRecord, ClientStatistics, CompletionRecord,
    ConflictingBooking, GatewayRefund, NewBooking, NewRefund, PaymentRecord, ProviderStatistics,
    RefundActivity, RefundOutcome, RescheduleRecord, ServiceOffering, SettlementOutcome,
    StatusChange, TimeSlot, WorkingSchedule,
};
use crate::BookingResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc, Weekday};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Read access to users and the service catalog
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Check that a user (client or provider) exists
    async fn user_exists(&self, user_id: Uuid) -> BookingResult<bool>;

    /// Find a bookable service
    async fn find_service(&self, service_id: Uuid) -> BookingResult<Option<ServiceOffering>>;
}

/// Provider calendar access
#[async_trait]
pub trait SlotRepository: Send + Sync {
    /// Active slots of `provider_id` intersecting `[start, end)`
    async fn find_overlapping(
        &self,
        provider_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BookingResult<Vec<ConflictingBooking>>;

    /// Insert a slot, re-checking overlap atomically.
    ///
    /// Returns `SlotConflict` when another slot took the window first.
    async fn reserve_slot(&self, slot: &TimeSlot) -> BookingResult<TimeSlot>;

    /// Delete every slot owned by a booking, returning how many were removed
    async fn release_slots(&self, booking_id: Uuid) -> BookingResult<u64>;

    /// Find a single slot
    async fn find_slot(&self, slot_id: Uuid) -> BookingResult<Option<TimeSlot>>;

    /// Delete a single slot
    async fn release_slot(&self, slot_id: Uuid) -> BookingResult<bool>;

    /// Working hours of a provider for a weekday, if published
    async fn get_working_hours(
        &self,
        provider_id: Uuid,
        weekday: Weekday,
    ) -> BookingResult<Option<WorkingSchedule>>;
}

/// Booking aggregate persistence.
///
/// Every mutating method is one atomic unit and applies only while the
/// booking is still in the record's `expected_status`; otherwise it fails with
/// `InvalidTransition` carrying the current status.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Find booking by ID, with its service lines and slots
    async fn find_by_id(&self, id: Uuid) -> BookingResult<Option<Booking>>;

    /// Find booking by booking number
    async fn find_by_number(&self, booking_number: &str) -> BookingResult<Option<Booking>>;

    /// Whether the client has any booking at all (first-booking discount)
    async fn client_has_bookings(&self, client_id: Uuid) -> BookingResult<bool>;

    /// Persist a booking with its slots and service lines.
    ///
    /// Overlap is re-checked under a provider-scoped lock; a slot taken in the
    /// meantime yields `SlotConflict` and nothing is written.
    async fn create_with_slots(&self, new_booking: &NewBooking) -> BookingResult<Booking>;

    /// Plain status move
    async fn transition_status(&self, change: &StatusChange) -> BookingResult<Booking>;

    /// Cancel: status, cancellation metadata and slot release together
    async fn apply_cancellation(&self, record: &CancellationRecord) -> BookingResult<Booking>;

    /// Move a booking to a new window.
    ///
    /// The booking's own slots are replaced under the provider lock; overlap
    /// with any other slot yields `SlotConflict` and nothing is written.
    async fn apply_reschedule(&self, record: &RescheduleRecord) -> BookingResult<Booking>;

    /// Backfill the refund result on a cancelled booking
    async fn record_refund_outcome(
        &self,
        booking_id: Uuid,
        outcome: &RefundOutcome,
    ) -> BookingResult<()>;

    /// Complete: status, completion metadata and both statistics rows together
    async fn apply_completion(&self, record: &CompletionRecord) -> BookingResult<Booking>;

    /// Backfill the capture/payout result on a completed booking
    async fn record_settlement(
        &self,
        booking_id: Uuid,
        settlement: &SettlementOutcome,
    ) -> BookingResult<()>;
}

/// Rolling statistics read access
#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    /// Provider statistics, empty when the provider never completed a booking
    async fn provider_statistics(&self, provider_id: Uuid) -> BookingResult<ProviderStatistics>;

    /// Client statistics, empty when the client never completed a booking
    async fn client_statistics(&self, client_id: Uuid) -> BookingResult<ClientStatistics>;
}

/// Payments and issued refunds
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn find_payment(&self, payment_id: Uuid) -> BookingResult<Option<PaymentRecord>>;

    /// Service payment captured under a gateway reference
    async fn find_payment_by_reference(
        &self,
        gateway_reference: &str,
    ) -> BookingResult<Option<PaymentRecord>>;

    /// Refunds issued to a user today and this calendar month
    async fn refund_activity(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<RefundActivity>;

    /// Hold a refund against the payment before the gateway is called.
    ///
    /// Locks the payment, re-checks the remaining refundable amount and counts
    /// the refund immediately, so concurrent reservations cannot exceed the
    /// payment. Fails with `RefundExceedsRemaining` otherwise.
    async fn reserve_refund(&self, refund: &NewRefund) -> BookingResult<PaymentRecord>;

    /// Mark a reserved refund as paid out
    async fn confirm_refund(
        &self,
        refund_id: Uuid,
        transaction_id: Option<&str>,
    ) -> BookingResult<PaymentRecord>;

    /// Drop a reserved refund the gateway rejected and restore the payment
    async fn release_refund(&self, refund_id: Uuid) -> BookingResult<PaymentRecord>;
}

/// Payment gateway
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Refund part of a captured payment
    async fn refund(&self, payment_reference: &str, amount: Decimal)
        -> BookingResult<GatewayRefund>;

    /// Capture the held payment of a booking
    async fn capture_payment(&self, booking_reference: &str) -> BookingResult<()>;

    /// Pay the provider their net share
    async fn transfer_to_provider(
        &self,
        booking_reference: &str,
        net_amount: Decimal,
    ) -> BookingResult<()>;
}

/// Outbound notifications; callers treat failures as non-fatal
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, event: &BookingEvent, booking: &Booking) -> BookingResult<()>;
}
