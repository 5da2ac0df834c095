//! In-memory implementation of the repository ports
//!
//! All state sits behind one `parking_lot::Mutex`, so overlap checks and
//! inserts are atomic the same way the PostgreSQL adapter makes them atomic
//! with its provider lock. Used by the integration tests and by embedders that
//! do not need durable storage.

use async_trait::async_trait;
use booking_core::{
    models::{
        intervals_overlap, Booking, BookingStatus, CancellationRecord, ClientStatistics,
        CompletionRecord, ConflictingBooking, NewBooking, NewRefund, PaymentPurpose,
        PaymentRecord, ProviderStatistics, RefundActivity, RefundOutcome, RefundStatus,
        RescheduleRecord, ServiceOffering, SettlementOutcome, StatusChange, TimeSlot,
        WorkingSchedule,
    },
    traits::{
        BookingRepository, CatalogRepository, PaymentRepository, SlotRepository,
        StatisticsRepository,
    },
    BookingError, BookingResult,
};
use chrono::{DateTime, Utc, Weekday};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::repositories::payment_repo::activity_window;

#[derive(Default)]
struct MemoryState {
    users: HashSet<Uuid>,
    services: HashMap<Uuid, ServiceOffering>,
    schedules: HashMap<(Uuid, Weekday), WorkingSchedule>,
    bookings: HashMap<Uuid, Booking>,
    slots: Vec<TimeSlot>,
    payments: HashMap<Uuid, PaymentRecord>,
    refunds: Vec<(NewRefund, RefundStatus)>,
    provider_stats: HashMap<Uuid, ProviderStatistics>,
    client_stats: HashMap<Uuid, ClientStatistics>,
}

impl MemoryState {
    fn conflicts(
        &self,
        provider_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<ConflictingBooking> {
        let mut found: Vec<ConflictingBooking> = self
            .slots
            .iter()
            .filter(|s| s.provider_id == provider_id && s.overlaps(start, end))
            .map(|s| ConflictingBooking {
                slot_id: s.id,
                booking_id: s.booking_id,
                booking_number: s
                    .booking_id
                    .and_then(|id| self.bookings.get(&id))
                    .map(|b| b.booking_number.clone()),
                start_time: s.start_time,
                end_time: s.end_time,
                kind: s.kind,
            })
            .collect();
        found.sort_by_key(|c| c.start_time);
        found
    }

    fn hydrated(&self, booking: &Booking) -> Booking {
        let mut booking = booking.clone();
        booking.slots = self
            .slots
            .iter()
            .filter(|s| s.booking_id == Some(booking.id))
            .cloned()
            .collect();
        booking.slots.sort_by_key(|s| s.start_time);
        booking
    }

    /// Booking in `expected` status, ready for mutation
    fn guarded(
        &mut self,
        id: Uuid,
        expected: BookingStatus,
        operation: &'static str,
    ) -> BookingResult<&mut Booking> {
        let booking = self
            .bookings
            .get_mut(&id)
            .ok_or_else(|| BookingError::BookingNotFound(id.to_string()))?;

        if booking.status != expected {
            warn!("Cannot {} booking {} in status {}", operation, id, booking.status);
            return Err(BookingError::InvalidTransition {
                status: booking.status,
                operation,
            });
        }

        Ok(booking)
    }

    /// Reserved refund still awaiting the gateway
    fn pending_refund(&mut self, refund_id: Uuid) -> BookingResult<&mut (NewRefund, RefundStatus)> {
        self.refunds
            .iter_mut()
            .find(|(r, status)| r.id == refund_id && *status == RefundStatus::Pending)
            .ok_or_else(|| BookingError::Database(format!("Refund {} is not pending", refund_id)))
    }

    fn payment(&self, payment_id: Uuid) -> BookingResult<PaymentRecord> {
        self.payments
            .get(&payment_id)
            .cloned()
            .ok_or(BookingError::PaymentNotFound(payment_id))
    }

    fn require(&self, id: Uuid) -> BookingResult<Booking> {
        self.bookings
            .get(&id)
            .map(|b| self.hydrated(b))
            .ok_or_else(|| BookingError::BookingNotFound(id.to_string()))
    }
}

/// Process-local store implementing every repository port
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Seeding ====================

    pub fn add_user(&self, user_id: Uuid) {
        self.state.lock().users.insert(user_id);
    }

    pub fn add_service(&self, service: ServiceOffering) {
        self.state.lock().services.insert(service.id, service);
    }

    pub fn set_schedule(&self, schedule: WorkingSchedule) {
        self.state
            .lock()
            .schedules
            .insert((schedule.provider_id, schedule.weekday), schedule);
    }

    pub fn add_payment(&self, payment: PaymentRecord) {
        self.state.lock().payments.insert(payment.id, payment);
    }

    /// Mark a booking as paid through the gateway
    pub fn record_booking_payment(
        &self,
        booking_id: Uuid,
        amount: Decimal,
        payment_reference: Option<String>,
    ) -> BookingResult<()> {
        let mut state = self.state.lock();
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| BookingError::BookingNotFound(booking_id.to_string()))?;
        booking.paid_amount = amount;
        booking.payment_reference = payment_reference;
        Ok(())
    }

    /// Put a booking into any status, bypassing the lifecycle
    pub fn force_status(&self, booking_id: Uuid, status: BookingStatus) -> BookingResult<()> {
        let mut state = self.state.lock();
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| BookingError::BookingNotFound(booking_id.to_string()))?;
        booking.status = status;
        Ok(())
    }

    // ==================== Inspection ====================

    /// Every active slot of a provider, ordered by start
    pub fn provider_slots(&self, provider_id: Uuid) -> Vec<TimeSlot> {
        let state = self.state.lock();
        let mut slots: Vec<TimeSlot> = state
            .slots
            .iter()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.start_time);
        slots
    }

    pub fn refunds_of(&self, user_id: Uuid) -> Vec<(NewRefund, RefundStatus)> {
        self.state
            .lock()
            .refunds
            .iter()
            .filter(|(r, _)| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn booking_count(&self) -> usize {
        self.state.lock().bookings.len()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryStore {
    async fn user_exists(&self, user_id: Uuid) -> BookingResult<bool> {
        Ok(self.state.lock().users.contains(&user_id))
    }

    async fn find_service(&self, service_id: Uuid) -> BookingResult<Option<ServiceOffering>> {
        Ok(self.state.lock().services.get(&service_id).cloned())
    }
}

#[async_trait]
impl SlotRepository for InMemoryStore {
    async fn find_overlapping(
        &self,
        provider_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BookingResult<Vec<ConflictingBooking>> {
        Ok(self.state.lock().conflicts(provider_id, start, end))
    }

    async fn reserve_slot(&self, slot: &TimeSlot) -> BookingResult<TimeSlot> {
        let mut state = self.state.lock();

        if let Some(conflict) = state
            .conflicts(slot.provider_id, slot.start_time, slot.end_time)
            .into_iter()
            .next()
        {
            return Err(conflict.into());
        }

        state.slots.push(slot.clone());
        debug!("Reserved slot {}", slot.id);
        Ok(slot.clone())
    }

    async fn release_slots(&self, booking_id: Uuid) -> BookingResult<u64> {
        let mut state = self.state.lock();
        let before = state.slots.len();
        state.slots.retain(|s| s.booking_id != Some(booking_id));
        Ok((before - state.slots.len()) as u64)
    }

    async fn find_slot(&self, slot_id: Uuid) -> BookingResult<Option<TimeSlot>> {
        Ok(self
            .state
            .lock()
            .slots
            .iter()
            .find(|s| s.id == slot_id)
            .cloned())
    }

    async fn release_slot(&self, slot_id: Uuid) -> BookingResult<bool> {
        let mut state = self.state.lock();
        let before = state.slots.len();
        state.slots.retain(|s| s.id != slot_id);
        Ok(state.slots.len() < before)
    }

    async fn get_working_hours(
        &self,
        provider_id: Uuid,
        weekday: Weekday,
    ) -> BookingResult<Option<WorkingSchedule>> {
        Ok(self
            .state
            .lock()
            .schedules
            .get(&(provider_id, weekday))
            .cloned())
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn find_by_id(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        let state = self.state.lock();
        Ok(state.bookings.get(&id).map(|b| state.hydrated(b)))
    }

    async fn find_by_number(&self, booking_number: &str) -> BookingResult<Option<Booking>> {
        let state = self.state.lock();
        Ok(state
            .bookings
            .values()
            .find(|b| b.booking_number == booking_number)
            .map(|b| state.hydrated(b)))
    }

    async fn client_has_bookings(&self, client_id: Uuid) -> BookingResult<bool> {
        Ok(self
            .state
            .lock()
            .bookings
            .values()
            .any(|b| b.client_id == client_id))
    }

    async fn create_with_slots(&self, new_booking: &NewBooking) -> BookingResult<Booking> {
        let mut state = self.state.lock();
        let booking = &new_booking.booking;

        for slot in &new_booking.slots {
            if let Some(conflict) = state
                .conflicts(slot.provider_id, slot.start_time, slot.end_time)
                .into_iter()
                .next()
            {
                return Err(conflict.into());
            }
        }

        if state
            .bookings
            .values()
            .any(|b| b.booking_number == booking.booking_number)
        {
            return Err(BookingError::Database(format!(
                "Duplicate booking number {}",
                booking.booking_number
            )));
        }

        let mut stored = booking.clone();
        stored.service_lines = new_booking.service_lines.clone();
        stored.slots = Vec::new();
        state.bookings.insert(stored.id, stored);
        state.slots.extend(new_booking.slots.iter().cloned());

        state.require(booking.id)
    }

    async fn transition_status(&self, change: &StatusChange) -> BookingResult<Booking> {
        let mut state = self.state.lock();
        let booking = state.guarded(change.booking_id, change.expected_status, change.operation())?;
        booking.status = change.new_status;
        booking.updated_at = change.at;
        state.require(change.booking_id)
    }

    async fn apply_cancellation(&self, record: &CancellationRecord) -> BookingResult<Booking> {
        let mut state = self.state.lock();
        let booking = state.guarded(record.booking_id, record.expected_status, "cancel")?;
        booking.status = record.new_status;
        booking.cancelled_at = Some(record.cancelled_at);
        booking.cancelled_by = Some(record.cancelled_by);
        booking.cancellation_reason = Some(record.reason.clone());
        booking.cancellation_fee_amount = Some(record.fee_amount);
        booking.cancellation_fee_percent = Some(record.fee_percent);
        booking.updated_at = record.cancelled_at;

        state.slots.retain(|s| s.booking_id != Some(record.booking_id));
        state.require(record.booking_id)
    }

    async fn apply_reschedule(&self, record: &RescheduleRecord) -> BookingResult<Booking> {
        let mut state = self.state.lock();

        let current = state.guarded(record.booking_id, record.expected_status, "reschedule")?;
        if current.reschedule_count != record.expected_count {
            warn!(
                "Booking {} was moved concurrently ({} != {})",
                record.booking_id, current.reschedule_count, record.expected_count
            );
            return Err(BookingError::InvalidTransition {
                status: current.status,
                operation: "reschedule",
            });
        }

        for slot in &record.slots {
            if let Some(conflict) = state
                .conflicts(slot.provider_id, slot.start_time, slot.end_time)
                .into_iter()
                .find(|c| c.booking_id != Some(record.booking_id))
            {
                return Err(conflict.into());
            }
        }

        state.slots.retain(|s| s.booking_id != Some(record.booking_id));
        state.slots.extend(record.slots.iter().cloned());

        let booking = state.guarded(record.booking_id, record.expected_status, "reschedule")?;
        booking.start_time = record.start_time;
        booking.end_time = record.end_time;
        booking.duration_minutes = record.duration_minutes;
        booking.reschedule_count += 1;
        booking.updated_at = record.rescheduled_at;

        state.require(record.booking_id)
    }

    async fn record_refund_outcome(
        &self,
        booking_id: Uuid,
        outcome: &RefundOutcome,
    ) -> BookingResult<()> {
        let mut state = self.state.lock();
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| BookingError::BookingNotFound(booking_id.to_string()))?;
        booking.refund_outcome = Some(outcome.clone());
        Ok(())
    }

    async fn apply_completion(&self, record: &CompletionRecord) -> BookingResult<Booking> {
        let mut state = self.state.lock();
        let booking = state.guarded(record.booking_id, record.expected_status, "complete")?;
        booking.status = BookingStatus::Completed;
        booking.completed_at = Some(record.completed_at);
        booking.service_quality = record.quality;
        booking.completion_notes = record.notes.clone();
        booking.bonuses = Some(record.bonuses.clone());
        booking.review_available_until = Some(record.review_available_until);
        booking.updated_at = record.completed_at;

        state
            .client_stats
            .entry(record.client_id)
            .or_insert_with(|| ClientStatistics::empty(record.client_id))
            .record_completion(
                record.client_spent,
                record.bonuses.client_cashback,
                record.bonuses.loyalty_points,
                record.completed_at,
            );

        state
            .provider_stats
            .entry(record.provider_id)
            .or_insert_with(|| ProviderStatistics::empty(record.provider_id))
            .record_completion(
                record.provider_net_earnings,
                record.bonuses.provider_quality_bonus,
                record.quality,
                record.completed_at,
            );

        state.require(record.booking_id)
    }

    async fn record_settlement(
        &self,
        booking_id: Uuid,
        settlement: &SettlementOutcome,
    ) -> BookingResult<()> {
        let mut state = self.state.lock();
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| BookingError::BookingNotFound(booking_id.to_string()))?;
        booking.settlement = Some(settlement.clone());
        Ok(())
    }
}

#[async_trait]
impl StatisticsRepository for InMemoryStore {
    async fn provider_statistics(&self, provider_id: Uuid) -> BookingResult<ProviderStatistics> {
        Ok(self
            .state
            .lock()
            .provider_stats
            .get(&provider_id)
            .cloned()
            .unwrap_or_else(|| ProviderStatistics::empty(provider_id)))
    }

    async fn client_statistics(&self, client_id: Uuid) -> BookingResult<ClientStatistics> {
        Ok(self
            .state
            .lock()
            .client_stats
            .get(&client_id)
            .cloned()
            .unwrap_or_else(|| ClientStatistics::empty(client_id)))
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn find_payment(&self, payment_id: Uuid) -> BookingResult<Option<PaymentRecord>> {
        Ok(self.state.lock().payments.get(&payment_id).cloned())
    }

    async fn find_payment_by_reference(
        &self,
        gateway_reference: &str,
    ) -> BookingResult<Option<PaymentRecord>> {
        Ok(self
            .state
            .lock()
            .payments
            .values()
            .find(|p| {
                p.purpose == PaymentPurpose::ServicePayment
                    && p.gateway_reference.as_deref() == Some(gateway_reference)
            })
            .cloned())
    }

    async fn refund_activity(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<RefundActivity> {
        let (day_start, month_start) = activity_window(now);
        let state = self.state.lock();

        let mut activity = RefundActivity::default();
        for refund in state
            .refunds
            .iter()
            .map(|(r, _)| r)
            .filter(|r| r.user_id == user_id && r.created_at >= month_start)
        {
            activity.refunded_this_month += refund.amount;
            if refund.created_at >= day_start {
                activity.refunds_today += 1;
            }
        }

        Ok(activity)
    }

    async fn reserve_refund(&self, refund: &NewRefund) -> BookingResult<PaymentRecord> {
        let mut state = self.state.lock();
        let payment = state
            .payments
            .get_mut(&refund.payment_id)
            .ok_or(BookingError::PaymentNotFound(refund.payment_id))?;

        let remaining = payment.remaining_refundable();
        if refund.amount > remaining {
            warn!(
                "Refund {} exceeds remaining {} on payment {}",
                refund.amount, remaining, payment.id
            );
            return Err(BookingError::RefundExceedsRemaining {
                requested: refund.amount,
                remaining,
            });
        }

        payment.apply_refund(refund.amount);
        let updated = payment.clone();
        state.refunds.push((refund.clone(), RefundStatus::Pending));
        Ok(updated)
    }

    async fn confirm_refund(
        &self,
        refund_id: Uuid,
        transaction_id: Option<&str>,
    ) -> BookingResult<PaymentRecord> {
        let mut state = self.state.lock();
        let entry = state.pending_refund(refund_id)?;
        entry.0.transaction_id = transaction_id.map(str::to_string);
        entry.1 = RefundStatus::Completed;
        let payment_id = entry.0.payment_id;
        state.payment(payment_id)
    }

    async fn release_refund(&self, refund_id: Uuid) -> BookingResult<PaymentRecord> {
        let mut state = self.state.lock();
        let (refund, _) = state.pending_refund(refund_id)?.clone();
        state.refunds.retain(|(r, _)| r.id != refund_id);

        let payment = state
            .payments
            .get_mut(&refund.payment_id)
            .ok_or(BookingError::PaymentNotFound(refund.payment_id))?;
        payment.revert_refund(refund.amount);
        Ok(payment.clone())
    }
}

/// Whether two slots of the same provider collide; exposed for assertions
pub fn slots_collide(a: &TimeSlot, b: &TimeSlot) -> bool {
    a.provider_id == b.provider_id
        && intervals_overlap(a.start_time, a.end_time, b.start_time, b.end_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::models::{BookingDetails, BookingType, PaymentPurpose, PaymentStatus, SlotKind};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap()
    }

    fn booking(provider_id: Uuid, number: &str, start: DateTime<Utc>) -> NewBooking {
        let id = Uuid::new_v4();
        let end = start + Duration::minutes(60);
        NewBooking {
            booking: Booking {
                id,
                booking_number: number.to_string(),
                client_id: Uuid::new_v4(),
                provider_id,
                service_id: Uuid::new_v4(),
                booking_type: BookingType::Remote,
                status: BookingStatus::Pending,
                start_time: start,
                end_time: end,
                duration_minutes: 60,
                base_price: dec!(1000),
                service_price: dec!(1000),
                delivery_fee: Decimal::ZERO,
                discount_amount: Decimal::ZERO,
                deposit_amount: Decimal::ZERO,
                total_price: dec!(1000),
                paid_amount: Decimal::ZERO,
                payment_reference: None,
                details: BookingDetails::default(),
                cancelled_at: None,
                cancelled_by: None,
                cancellation_reason: None,
                cancellation_fee_amount: None,
                cancellation_fee_percent: None,
                refund_outcome: None,
                completed_at: None,
                service_quality: None,
                completion_notes: None,
                bonuses: None,
                review_available_until: None,
                settlement: None,
                reschedule_count: 0,
                service_lines: Vec::new(),
                slots: Vec::new(),
                created_at: at(0),
                updated_at: at(0),
            },
            slots: vec![TimeSlot::new(provider_id, Some(id), start, end, SlotKind::Service)],
            service_lines: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_overlap_and_names_booking() {
        let store = InMemoryStore::new();
        let provider = Uuid::new_v4();

        store
            .create_with_slots(&booking(provider, "BK20260302-AAAAAA", at(10)))
            .await
            .unwrap();

        let second = booking(provider, "BK20260302-BBBBBB", at(10) + Duration::minutes(30));
        match store.create_with_slots(&second).await {
            Err(BookingError::SlotConflict { booking_number, .. }) => {
                assert_eq!(booking_number.as_deref(), Some("BK20260302-AAAAAA"));
            }
            other => panic!("expected slot conflict, got {:?}", other),
        }
        assert_eq!(store.booking_count(), 1);
    }

    #[tokio::test]
    async fn test_touching_slots_are_accepted() {
        let store = InMemoryStore::new();
        let provider = Uuid::new_v4();

        store
            .create_with_slots(&booking(provider, "BK20260302-AAAAAA", at(10)))
            .await
            .unwrap();
        store
            .create_with_slots(&booking(provider, "BK20260302-BBBBBB", at(11)))
            .await
            .unwrap();

        let slots = store.provider_slots(provider);
        assert_eq!(slots.len(), 2);
        assert!(!slots_collide(&slots[0], &slots[1]));
    }

    #[tokio::test]
    async fn test_guarded_cancellation_releases_slots_once() {
        let store = InMemoryStore::new();
        let provider = Uuid::new_v4();
        let created = store
            .create_with_slots(&booking(provider, "BK20260302-AAAAAA", at(10)))
            .await
            .unwrap();

        let record = CancellationRecord {
            booking_id: created.id,
            expected_status: BookingStatus::Pending,
            new_status: BookingStatus::CancelledByClient,
            cancelled_at: at(1),
            cancelled_by: created.client_id,
            reason: "changed plans".to_string(),
            fee_amount: Decimal::ZERO,
            fee_percent: Decimal::ZERO,
        };

        let cancelled = store.apply_cancellation(&record).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::CancelledByClient);
        assert!(cancelled.slots.is_empty());
        assert!(store.provider_slots(provider).is_empty());

        let again = store.apply_cancellation(&record).await;
        assert!(matches!(
            again,
            Err(BookingError::InvalidTransition {
                status: BookingStatus::CancelledByClient,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_blocked_slot_conflict_has_no_booking_number() {
        let store = InMemoryStore::new();
        let provider = Uuid::new_v4();
        let block = TimeSlot::new(provider, None, at(9), at(12), SlotKind::Blocked);
        store.reserve_slot(&block).await.unwrap();

        let conflicts = store.find_overlapping(provider, at(10), at(11)).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].booking_number, None);
        assert_eq!(conflicts[0].kind, SlotKind::Blocked);

        assert!(store.release_slot(block.id).await.unwrap());
        assert!(store.find_overlapping(provider, at(10), at(11)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_activity_windows() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        store.add_payment(PaymentRecord {
            id: payment_id,
            user_id: user,
            booking_id: None,
            purpose: PaymentPurpose::ServicePayment,
            status: PaymentStatus::Completed,
            amount: dec!(1000),
            refunded_amount: Decimal::ZERO,
            gateway_reference: Some("pay_1".to_string()),
            processed_at: Some(at(0)),
        });

        let now = Utc.with_ymd_and_hms(2026, 3, 17, 12, 0, 0).unwrap();
        for (amount, when) in [
            (dec!(100), now - Duration::days(20)), // previous month
            (dec!(150), now - Duration::days(3)),
            (dec!(50), now - Duration::hours(2)),
        ] {
            let refund = NewRefund {
                id: Uuid::new_v4(),
                payment_id,
                user_id: user,
                amount,
                reason: "partial".to_string(),
                transaction_id: None,
                created_at: when,
            };
            store.reserve_refund(&refund).await.unwrap();
            store.confirm_refund(refund.id, Some("rf_1")).await.unwrap();
        }

        let activity = store.refund_activity(user, now).await.unwrap();
        assert_eq!(activity.refunds_today, 1);
        assert_eq!(activity.refunded_this_month, dec!(200));

        let payment = store.find_payment(payment_id).await.unwrap().unwrap();
        assert_eq!(payment.refunded_amount, dec!(300));
        assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
    }

    fn service_payment(user: Uuid, amount: Decimal) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            user_id: user,
            booking_id: None,
            purpose: PaymentPurpose::ServicePayment,
            status: PaymentStatus::Completed,
            amount,
            refunded_amount: Decimal::ZERO,
            gateway_reference: Some("pay_2".to_string()),
            processed_at: Some(at(0)),
        }
    }

    fn refund_of(payment: &PaymentRecord, amount: Decimal) -> NewRefund {
        NewRefund {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            user_id: payment.user_id,
            amount,
            reason: "double charge".to_string(),
            transaction_id: None,
            created_at: at(1),
        }
    }

    #[tokio::test]
    async fn test_pending_refund_blocks_second_reservation() {
        let store = InMemoryStore::new();
        let payment = service_payment(Uuid::new_v4(), dec!(1000));
        store.add_payment(payment.clone());

        let first = refund_of(&payment, dec!(600));
        let held = store.reserve_refund(&first).await.unwrap();
        assert_eq!(held.remaining_refundable(), dec!(400));

        let second = store.reserve_refund(&refund_of(&payment, dec!(600))).await;
        assert!(matches!(
            second,
            Err(BookingError::RefundExceedsRemaining { remaining, .. }) if remaining == dec!(400)
        ));

        // Pending refunds already count toward the limits
        let activity = store.refund_activity(payment.user_id, at(2)).await.unwrap();
        assert_eq!(activity.refunds_today, 1);
        assert_eq!(activity.refunded_this_month, dec!(600));
    }

    #[tokio::test]
    async fn test_released_refund_restores_payment() {
        let store = InMemoryStore::new();
        let payment = service_payment(Uuid::new_v4(), dec!(1000));
        store.add_payment(payment.clone());

        let refund = refund_of(&payment, dec!(1000));
        let held = store.reserve_refund(&refund).await.unwrap();
        assert_eq!(held.status, PaymentStatus::Refunded);

        let restored = store.release_refund(refund.id).await.unwrap();
        assert_eq!(restored.refunded_amount, Decimal::ZERO);
        assert_eq!(restored.status, PaymentStatus::Completed);
        assert!(store.refunds_of(payment.user_id).is_empty());

        // Nothing left to confirm or release
        assert!(store.confirm_refund(refund.id, None).await.is_err());
        assert!(store.release_refund(refund.id).await.is_err());
    }

    #[tokio::test]
    async fn test_find_payment_by_reference_ignores_deposits() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let mut deposit = service_payment(user, dec!(200));
        deposit.purpose = PaymentPurpose::BookingDeposit;
        deposit.gateway_reference = Some("pay_3".to_string());
        store.add_payment(deposit);

        assert!(store.find_payment_by_reference("pay_3").await.unwrap().is_none());

        let payment = service_payment(user, dec!(1000));
        store.add_payment(payment.clone());
        let found = store.find_payment_by_reference("pay_2").await.unwrap().unwrap();
        assert_eq!(found.id, payment.id);
    }

    #[tokio::test]
    async fn test_reschedule_swaps_slots_and_counts_moves() {
        let store = InMemoryStore::new();
        let provider = Uuid::new_v4();
        let created = store
            .create_with_slots(&booking(provider, "BK20260302-AAAAAA", at(10)))
            .await
            .unwrap();
        store
            .create_with_slots(&booking(provider, "BK20260302-BBBBBB", at(13)))
            .await
            .unwrap();

        // Overlapping its own old slot is fine
        let record = RescheduleRecord {
            booking_id: created.id,
            provider_id: provider,
            expected_status: BookingStatus::Pending,
            expected_count: 0,
            start_time: at(10) + Duration::minutes(30),
            end_time: at(11) + Duration::minutes(30),
            duration_minutes: 60,
            slots: vec![TimeSlot::new(
                provider,
                Some(created.id),
                at(10) + Duration::minutes(30),
                at(11) + Duration::minutes(30),
                SlotKind::Service,
            )],
            rescheduled_at: at(1),
        };
        let moved = store.apply_reschedule(&record).await.unwrap();
        assert_eq!(moved.start_time, at(10) + Duration::minutes(30));
        assert_eq!(moved.reschedule_count, 1);
        assert_eq!(moved.slots.len(), 1);
        assert_eq!(store.provider_slots(provider).len(), 2);

        // Replaying the same record is rejected by the move counter
        assert!(matches!(
            store.apply_reschedule(&record).await,
            Err(BookingError::InvalidTransition { .. })
        ));

        let onto_other = RescheduleRecord {
            expected_count: 1,
            start_time: at(13),
            end_time: at(14),
            slots: vec![TimeSlot::new(provider, Some(created.id), at(13), at(14), SlotKind::Service)],
            ..record
        };
        match store.apply_reschedule(&onto_other).await {
            Err(BookingError::SlotConflict { booking_number, .. }) => {
                assert_eq!(booking_number.as_deref(), Some("BK20260302-BBBBBB"));
            }
            other => panic!("expected slot conflict, got {:?}", other),
        }
        let unchanged = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(unchanged.start_time, at(10) + Duration::minutes(30));
        assert_eq!(unchanged.slots.len(), 1);
    }
}
