//! Refund orchestration
//!
//! Two entry points:
//!
//! - [`RefundOrchestrator::execute`] returns money after a cancellation. It
//!   never fails: anything the gateway cannot do becomes
//!   `ManualRefundRequired` for an operator to finish.
//! - [`RefundOrchestrator::refund_payment`] handles a standalone refund
//!   request. It is checked by [`RefundValidator`] first, and a gateway
//!   failure is reported to the caller.
//!
//! Both paths reserve the amount on the payment record before calling the
//! gateway, then confirm the reservation or release it if the gateway refuses.

use booking_core::config::RefundConfig;
use booking_core::models::{
    round_money, Booking, BookingStatus, GatewayRefund, NewRefund, PaymentPurpose, PaymentRecord,
    RefundActivity, RefundOutcome,
};
use booking_core::traits::{BookingRepository, PaymentGateway, PaymentRepository};
use booking_core::{BookingError, BookingResult};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Standalone refund request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RefundRequest {
    pub payment_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    pub reason: String,
}

/// Result of an accepted standalone refund
#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub payment: PaymentRecord,
    pub transaction_id: Option<String>,
}

/// Business rules for standalone refunds
#[derive(Debug, Clone)]
pub struct RefundValidator {
    config: RefundConfig,
}

impl RefundValidator {
    pub fn new(config: RefundConfig) -> Self {
        Self { config }
    }

    /// Last instant at which a payment may be refunded
    pub fn deadline(&self, payment: &PaymentRecord) -> Option<DateTime<Utc>> {
        let days = match payment.purpose {
            PaymentPurpose::ServicePayment => self.config.service_payment_days,
            PaymentPurpose::BookingDeposit => self.config.deposit_days,
            PaymentPurpose::Subscription => self.config.subscription_days,
        };
        payment.processed_at.map(|at| at + Duration::days(days))
    }

    /// Check a request against the payment, its booking and the user's
    /// recent refunds. Stops at the first violated rule.
    pub fn validate(
        &self,
        request: &RefundRequest,
        payment: &PaymentRecord,
        booking: Option<&Booking>,
        activity: &RefundActivity,
        now: DateTime<Utc>,
    ) -> BookingResult<()> {
        request.validate()?;

        if request.amount < self.config.min_amount {
            return Err(BookingError::Validation(format!(
                "Refund amount must be at least {}",
                self.config.min_amount
            )));
        }

        if !payment.is_refundable() {
            return Err(BookingError::NotRefundable(format!(
                "payment {} is {} with {} left",
                payment.id,
                payment.status,
                payment.remaining_refundable()
            )));
        }

        let remaining = payment.remaining_refundable();
        if request.amount > remaining {
            return Err(BookingError::RefundExceedsRemaining {
                requested: request.amount,
                remaining,
            });
        }

        let deadline = self.deadline(payment).ok_or_else(|| {
            BookingError::NotRefundable(format!("payment {} was never processed", payment.id))
        })?;
        if now > deadline {
            return Err(BookingError::RefundDeadlinePassed { deadline });
        }

        if let Some(booking) = booking {
            if payment.purpose == PaymentPurpose::ServicePayment {
                if let Some(outcome) = &booking.refund_outcome {
                    if !outcome.requires_manual_action() {
                        return Err(BookingError::NotRefundable(format!(
                            "booking {} was settled on cancellation ({})",
                            booking.booking_number,
                            outcome.kind()
                        )));
                    }
                }
            }

            match payment.purpose {
                PaymentPurpose::ServicePayment
                    if matches!(
                        booking.status,
                        BookingStatus::Completed | BookingStatus::InProgress
                    ) =>
                {
                    return Err(BookingError::RefundBlockedByStatus(booking.status));
                }
                PaymentPurpose::BookingDeposit if now >= booking.start_time => {
                    return Err(BookingError::DepositRefundAfterStart);
                }
                _ => {}
            }
        }

        if activity.refunds_today >= self.config.daily_limit {
            return Err(BookingError::DailyRefundLimit {
                limit: self.config.daily_limit,
            });
        }

        if activity.refunded_this_month + request.amount > self.config.monthly_ceiling {
            return Err(BookingError::MonthlyRefundCeiling {
                ceiling: self.config.monthly_ceiling,
            });
        }

        Ok(())
    }
}

/// Runs refunds through the payment gateway
pub struct RefundOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    payments: Arc<dyn PaymentRepository>,
    bookings: Arc<dyn BookingRepository>,
    validator: RefundValidator,
}

impl RefundOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        payments: Arc<dyn PaymentRepository>,
        bookings: Arc<dyn BookingRepository>,
        config: RefundConfig,
    ) -> Self {
        Self {
            gateway,
            payments,
            bookings,
            validator: RefundValidator::new(config),
        }
    }

    /// Refund what the client paid minus the cancellation fee
    #[instrument(skip(self, booking), fields(booking_number = %booking.booking_number))]
    pub async fn execute(&self, booking: &Booking, fee: Decimal) -> RefundOutcome {
        let paid = booking.paid_amount;
        if paid <= Decimal::ZERO {
            return RefundOutcome::NoPayment;
        }

        let amount = round_money((paid - fee).max(Decimal::ZERO));
        if amount.is_zero() {
            return RefundOutcome::NoRefund { fee };
        }

        let Some(reference) = booking.payment_reference.as_deref() else {
            warn!(
                "Booking {} has no payment reference, refund of {} needs manual handling",
                booking.booking_number, amount
            );
            return RefundOutcome::ManualRefundRequired {
                amount,
                fee,
                error_detail: "no payment reference on booking".to_string(),
            };
        };

        // Hold the refund against the captured payment, when there is one
        let reservation = match self.payments.find_payment_by_reference(reference).await {
            Ok(Some(payment)) => {
                let refund = NewRefund {
                    id: Uuid::new_v4(),
                    payment_id: payment.id,
                    user_id: payment.user_id,
                    amount,
                    reason: format!("Booking {} cancelled", booking.booking_number),
                    transaction_id: None,
                    created_at: booking.cancelled_at.unwrap_or(booking.updated_at),
                };
                if let Err(e) = self.payments.reserve_refund(&refund).await {
                    error!(
                        "Cannot hold refund of {} for booking {}: {}",
                        amount, booking.booking_number, e
                    );
                    return RefundOutcome::ManualRefundRequired {
                        amount,
                        fee,
                        error_detail: e.to_string(),
                    };
                }
                Some(refund.id)
            }
            Ok(None) => {
                warn!(
                    "No payment record for reference {} of booking {}",
                    reference, booking.booking_number
                );
                None
            }
            Err(e) => {
                error!(
                    "Payment lookup for booking {} failed: {}",
                    booking.booking_number, e
                );
                return RefundOutcome::ManualRefundRequired {
                    amount,
                    fee,
                    error_detail: e.to_string(),
                };
            }
        };

        let detail = match self.gateway.refund(reference, amount).await {
            Ok(GatewayRefund {
                success: true,
                transaction_id,
                ..
            }) => {
                let transaction_id = transaction_id.unwrap_or_default();
                if let Some(refund_id) = reservation {
                    self.confirm(refund_id, &transaction_id).await;
                }
                info!(
                    "Refunded {} for booking {} (fee {})",
                    amount, booking.booking_number, fee
                );
                return RefundOutcome::AutomaticRefund {
                    amount,
                    fee,
                    transaction_id,
                };
            }
            Ok(GatewayRefund { error, .. }) => {
                let detail = error.unwrap_or_else(|| "refund declined by gateway".to_string());
                error!(
                    "Gateway declined refund of {} for booking {}: {}",
                    amount, booking.booking_number, detail
                );
                detail
            }
            Err(e) => {
                error!(
                    "Refund of {} for booking {} failed: {}",
                    amount, booking.booking_number, e
                );
                e.to_string()
            }
        };

        if let Some(refund_id) = reservation {
            self.release(refund_id).await;
        }
        RefundOutcome::ManualRefundRequired {
            amount,
            fee,
            error_detail: detail,
        }
    }

    /// Mark a held refund as paid out; the money already left
    async fn confirm(&self, refund_id: Uuid, transaction_id: &str) {
        if let Err(e) = self
            .payments
            .confirm_refund(refund_id, Some(transaction_id))
            .await
        {
            error!(
                "Refund {} went through as {} but could not be confirmed: {}",
                refund_id, transaction_id, e
            );
        }
    }

    /// Give a held refund back to the payment after the gateway refused it
    async fn release(&self, refund_id: Uuid) {
        if let Err(e) = self.payments.release_refund(refund_id).await {
            error!("Failed to release held refund {}: {}", refund_id, e);
        }
    }

    /// Validate and execute a standalone refund
    #[instrument(skip(self, request), fields(payment_id = %request.payment_id, amount = %request.amount))]
    pub async fn refund_payment(
        &self,
        request: &RefundRequest,
        now: DateTime<Utc>,
    ) -> BookingResult<RefundReceipt> {
        let payment = self
            .payments
            .find_payment(request.payment_id)
            .await?
            .ok_or(BookingError::PaymentNotFound(request.payment_id))?;

        let booking = match payment.booking_id {
            Some(id) => self.bookings.find_by_id(id).await?,
            None => None,
        };

        let activity = self.payments.refund_activity(payment.user_id, now).await?;

        if let Err(e) = self
            .validator
            .validate(request, &payment, booking.as_ref(), &activity, now)
        {
            warn!("Refund of payment {} rejected: {}", payment.id, e);
            return Err(e);
        }

        let reference = payment.gateway_reference.as_deref().ok_or_else(|| {
            BookingError::NotRefundable(format!("payment {} has no gateway reference", payment.id))
        })?;

        let refund = NewRefund {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            user_id: payment.user_id,
            amount: request.amount,
            reason: request.reason.clone(),
            transaction_id: None,
            created_at: now,
        };
        // Counted before the gateway call so a concurrent request sees it
        self.payments.reserve_refund(&refund).await?;

        let response = match self.gateway.refund(reference, request.amount).await {
            Ok(response) if response.success => response,
            Ok(response) => {
                let detail = response
                    .error
                    .unwrap_or_else(|| "refund declined by gateway".to_string());
                error!("Gateway declined refund of payment {}: {}", payment.id, detail);
                self.release(refund.id).await;
                return Err(BookingError::Gateway(detail));
            }
            Err(e) => {
                error!("Refund of payment {} failed: {}", payment.id, e);
                self.release(refund.id).await;
                return Err(e);
            }
        };

        let updated = self
            .payments
            .confirm_refund(refund.id, response.transaction_id.as_deref())
            .await?;

        info!(
            "Refunded {} of payment {}, {} remaining",
            request.amount,
            payment.id,
            updated.remaining_refundable()
        );

        Ok(RefundReceipt {
            payment: updated,
            transaction_id: response.transaction_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use booking_core::models::{BookingDetails, BookingType, PaymentStatus, SettlementOutcome};
    use booking_core::models::{
        CancellationRecord, CompletionRecord, NewBooking, RescheduleRecord, StatusChange,
    };
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    /// Gateway with a scripted answer
    struct MockGateway {
        answer: Mutex<Option<BookingResult<GatewayRefund>>>,
        calls: Mutex<Vec<(String, Decimal)>>,
    }

    impl MockGateway {
        fn answering(answer: BookingResult<GatewayRefund>) -> Self {
            Self {
                answer: Mutex::new(Some(answer)),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn ok(tx: &str) -> Self {
            Self::answering(Ok(GatewayRefund {
                success: true,
                transaction_id: Some(tx.to_string()),
                error: None,
            }))
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn refund(&self, reference: &str, amount: Decimal) -> BookingResult<GatewayRefund> {
            self.calls.lock().push((reference.to_string(), amount));
            self.answer
                .lock()
                .take()
                .unwrap_or_else(|| Err(BookingError::Gateway("unexpected call".to_string())))
        }

        async fn capture_payment(&self, _booking_reference: &str) -> BookingResult<()> {
            Ok(())
        }

        async fn transfer_to_provider(&self, _reference: &str, _net: Decimal) -> BookingResult<()> {
            Ok(())
        }
    }

    /// Payment port holding a single payment
    struct MockPayments {
        payment: Mutex<Option<PaymentRecord>>,
        activity: RefundActivity,
        held: Mutex<Vec<NewRefund>>,
        confirmed: Mutex<Vec<(Uuid, Option<String>)>>,
    }

    impl MockPayments {
        fn holding(payment: Option<PaymentRecord>) -> Arc<Self> {
            Arc::new(Self {
                payment: Mutex::new(payment),
                activity: RefundActivity::default(),
                held: Mutex::new(Vec::new()),
                confirmed: Mutex::new(Vec::new()),
            })
        }

        fn current(&self) -> PaymentRecord {
            self.payment.lock().clone().unwrap()
        }
    }

    #[async_trait]
    impl PaymentRepository for MockPayments {
        async fn find_payment(&self, id: Uuid) -> BookingResult<Option<PaymentRecord>> {
            Ok(self.payment.lock().clone().filter(|p| p.id == id))
        }

        async fn refund_activity(
            &self,
            _user_id: Uuid,
            _now: DateTime<Utc>,
        ) -> BookingResult<RefundActivity> {
            Ok(self.activity.clone())
        }

        async fn find_payment_by_reference(
            &self,
            reference: &str,
        ) -> BookingResult<Option<PaymentRecord>> {
            Ok(self
                .payment
                .lock()
                .clone()
                .filter(|p| p.gateway_reference.as_deref() == Some(reference)))
        }

        async fn reserve_refund(&self, refund: &NewRefund) -> BookingResult<PaymentRecord> {
            let mut guard = self.payment.lock();
            let payment = guard
                .as_mut()
                .ok_or(BookingError::PaymentNotFound(refund.payment_id))?;
            let remaining = payment.remaining_refundable();
            if refund.amount > remaining {
                return Err(BookingError::RefundExceedsRemaining {
                    requested: refund.amount,
                    remaining,
                });
            }
            payment.apply_refund(refund.amount);
            self.held.lock().push(refund.clone());
            Ok(payment.clone())
        }

        async fn confirm_refund(
            &self,
            refund_id: Uuid,
            transaction_id: Option<&str>,
        ) -> BookingResult<PaymentRecord> {
            self.confirmed
                .lock()
                .push((refund_id, transaction_id.map(str::to_string)));
            Ok(self.current())
        }

        async fn release_refund(&self, refund_id: Uuid) -> BookingResult<PaymentRecord> {
            let refund = {
                let mut held = self.held.lock();
                let position = held
                    .iter()
                    .position(|r| r.id == refund_id)
                    .ok_or_else(|| BookingError::Database("not held".to_string()))?;
                held.remove(position)
            };
            let mut guard = self.payment.lock();
            let payment = guard
                .as_mut()
                .ok_or(BookingError::PaymentNotFound(refund.payment_id))?;
            payment.revert_refund(refund.amount);
            Ok(payment.clone())
        }
    }

    /// Booking port that knows no bookings
    struct NoBookings;

    #[async_trait]
    impl BookingRepository for NoBookings {
        async fn find_by_id(&self, _id: Uuid) -> BookingResult<Option<Booking>> {
            Ok(None)
        }
        async fn find_by_number(&self, _n: &str) -> BookingResult<Option<Booking>> {
            Ok(None)
        }
        async fn client_has_bookings(&self, _c: Uuid) -> BookingResult<bool> {
            Ok(false)
        }
        async fn create_with_slots(&self, _b: &NewBooking) -> BookingResult<Booking> {
            Err(BookingError::Internal("read-only".to_string()))
        }
        async fn transition_status(&self, _c: &StatusChange) -> BookingResult<Booking> {
            Err(BookingError::Internal("read-only".to_string()))
        }
        async fn apply_cancellation(&self, _r: &CancellationRecord) -> BookingResult<Booking> {
            Err(BookingError::Internal("read-only".to_string()))
        }
        async fn apply_reschedule(&self, _r: &RescheduleRecord) -> BookingResult<Booking> {
            Err(BookingError::Internal("read-only".to_string()))
        }
        async fn record_refund_outcome(&self, _id: Uuid, _o: &RefundOutcome) -> BookingResult<()> {
            Ok(())
        }
        async fn apply_completion(&self, _r: &CompletionRecord) -> BookingResult<Booking> {
            Err(BookingError::Internal("read-only".to_string()))
        }
        async fn record_settlement(&self, _id: Uuid, _s: &SettlementOutcome) -> BookingResult<()> {
            Ok(())
        }
    }

    fn payment(purpose: PaymentPurpose, amount: Decimal) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            booking_id: None,
            purpose,
            status: PaymentStatus::Completed,
            amount,
            refunded_amount: Decimal::ZERO,
            gateway_reference: Some("pay_123".to_string()),
            processed_at: Some(now() - Duration::days(2)),
        }
    }

    fn booking(paid: Decimal, reference: Option<&str>) -> Booking {
        let start = now() + Duration::hours(3);
        Booking {
            id: Uuid::new_v4(),
            booking_number: "BK20260310-REFUND".to_string(),
            client_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            booking_type: BookingType::OnSite,
            status: BookingStatus::Confirmed,
            start_time: start,
            end_time: start + Duration::minutes(60),
            duration_minutes: 60,
            base_price: dec!(1000),
            service_price: dec!(1000),
            delivery_fee: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            deposit_amount: Decimal::ZERO,
            total_price: dec!(1000),
            paid_amount: paid,
            payment_reference: reference.map(str::to_string),
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
            created_at: now() - Duration::days(1),
            updated_at: now() - Duration::days(1),
        }
    }

    fn orchestrator(gateway: Arc<MockGateway>, payments: Arc<MockPayments>) -> RefundOrchestrator {
        RefundOrchestrator::new(
            gateway,
            payments,
            Arc::new(NoBookings),
            RefundConfig::default(),
        )
    }

    fn no_payments() -> Arc<MockPayments> {
        MockPayments::holding(None)
    }

    fn request(payment: &PaymentRecord, amount: Decimal) -> RefundRequest {
        RefundRequest {
            payment_id: payment.id,
            amount,
            reason: "service not as described".to_string(),
        }
    }

    // ==================== Cancellation refunds ====================

    #[tokio::test]
    async fn test_no_payment() {
        let gateway = Arc::new(MockGateway::ok("tx_1"));
        let outcome = orchestrator(gateway.clone(), no_payments())
            .execute(&booking(dec!(0), None), dec!(400))
            .await;

        assert_eq!(outcome, RefundOutcome::NoPayment);
        assert!(gateway.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fee_consumes_payment() {
        let gateway = Arc::new(MockGateway::ok("tx_1"));
        let outcome = orchestrator(gateway.clone(), no_payments())
            .execute(&booking(dec!(300), Some("pay_1")), dec!(400))
            .await;

        assert_eq!(outcome, RefundOutcome::NoRefund { fee: dec!(400) });
        assert!(gateway.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_automatic_refund_of_paid_minus_fee() {
        let gateway = Arc::new(MockGateway::ok("tx_42"));
        let outcome = orchestrator(gateway.clone(), no_payments())
            .execute(&booking(dec!(1000), Some("pay_1")), dec!(400))
            .await;

        assert_eq!(
            outcome,
            RefundOutcome::AutomaticRefund {
                amount: dec!(600),
                fee: dec!(400),
                transaction_id: "tx_42".to_string(),
            }
        );
        assert_eq!(gateway.calls.lock()[0], ("pay_1".to_string(), dec!(600)));
        // Refund plus retained fee equals what was paid
        assert_eq!(outcome.refund_amount() + dec!(400), dec!(1000));
    }

    #[tokio::test]
    async fn test_gateway_error_requires_manual_refund() {
        let gateway = Arc::new(MockGateway::answering(Err(BookingError::Gateway(
            "timeout".to_string(),
        ))));
        let outcome = orchestrator(gateway, no_payments())
            .execute(&booking(dec!(1000), Some("pay_1")), dec!(0))
            .await;

        assert!(outcome.requires_manual_action());
        assert_eq!(outcome.refund_amount(), dec!(1000));
    }

    #[tokio::test]
    async fn test_declined_refund_requires_manual_refund() {
        let gateway = Arc::new(MockGateway::answering(Ok(GatewayRefund {
            success: false,
            transaction_id: None,
            error: Some("card expired".to_string()),
        })));
        let outcome = orchestrator(gateway, no_payments())
            .execute(&booking(dec!(500), Some("pay_1")), dec!(100))
            .await;

        match outcome {
            RefundOutcome::ManualRefundRequired {
                amount,
                error_detail,
                ..
            } => {
                assert_eq!(amount, dec!(400));
                assert_eq!(error_detail, "card expired");
            }
            other => panic!("expected manual refund, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_refund_is_recorded_on_payment() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        let payments = MockPayments::holding(Some(p));
        let gateway = Arc::new(MockGateway::ok("tx_7"));

        let outcome = orchestrator(gateway, payments.clone())
            .execute(&booking(dec!(1000), Some("pay_123")), dec!(400))
            .await;

        assert_eq!(outcome.kind(), "automatic_refund");
        let current = payments.current();
        assert_eq!(current.refunded_amount, dec!(600));
        assert_eq!(current.status, PaymentStatus::PartiallyRefunded);

        let held = payments.held.lock();
        assert_eq!(held.len(), 1);
        assert_eq!(
            payments.confirmed.lock()[0],
            (held[0].id, Some("tx_7".to_string()))
        );
    }

    #[tokio::test]
    async fn test_declined_cancellation_refund_releases_hold() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        let payments = MockPayments::holding(Some(p));
        let gateway = Arc::new(MockGateway::answering(Ok(GatewayRefund {
            success: false,
            transaction_id: None,
            error: Some("insufficient funds".to_string()),
        })));

        let outcome = orchestrator(gateway, payments.clone())
            .execute(&booking(dec!(1000), Some("pay_123")), dec!(0))
            .await;

        assert!(outcome.requires_manual_action());
        assert_eq!(payments.current().refunded_amount, Decimal::ZERO);
        assert_eq!(payments.current().status, PaymentStatus::Completed);
        assert!(payments.held.lock().is_empty());
        assert!(payments.confirmed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_refund_beyond_payment_skips_gateway() {
        let mut p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        p.apply_refund(dec!(900));
        let payments = MockPayments::holding(Some(p));
        let gateway = Arc::new(MockGateway::ok("tx_1"));

        let outcome = orchestrator(gateway.clone(), payments.clone())
            .execute(&booking(dec!(1000), Some("pay_123")), dec!(400))
            .await;

        match outcome {
            RefundOutcome::ManualRefundRequired { amount, .. } => assert_eq!(amount, dec!(600)),
            other => panic!("expected manual refund, got {:?}", other),
        }
        assert!(gateway.calls.lock().is_empty());
        assert_eq!(payments.current().refunded_amount, dec!(900));
    }

    #[tokio::test]
    async fn test_missing_reference_requires_manual_refund() {
        let gateway = Arc::new(MockGateway::ok("tx_1"));
        let outcome = orchestrator(gateway.clone(), no_payments())
            .execute(&booking(dec!(500), None), dec!(0))
            .await;

        assert!(outcome.requires_manual_action());
        assert!(gateway.calls.lock().is_empty());
    }

    // ==================== Standalone refunds ====================

    fn validator() -> RefundValidator {
        RefundValidator::new(RefundConfig::default())
    }

    #[test]
    fn test_validator_accepts_fresh_payment() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        let result = validator().validate(
            &request(&p, dec!(250)),
            &p,
            None,
            &RefundActivity::default(),
            now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_validator_rejects_bad_input() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));

        let result = validator().validate(
            &request(&p, dec!(0)),
            &p,
            None,
            &RefundActivity::default(),
            now(),
        );
        assert!(matches!(result, Err(BookingError::Validation(_))));

        let mut long = request(&p, dec!(10));
        long.reason = "x".repeat(501);
        let result = validator().validate(&long, &p, None, &RefundActivity::default(), now());
        assert!(matches!(result, Err(BookingError::Validation(_))));
    }

    #[test]
    fn test_validator_rejects_over_remaining() {
        let mut p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        p.apply_refund(dec!(800));

        let result = validator().validate(
            &request(&p, dec!(300)),
            &p,
            None,
            &RefundActivity::default(),
            now(),
        );
        assert!(matches!(
            result,
            Err(BookingError::RefundExceedsRemaining { remaining, .. }) if remaining == dec!(200)
        ));
    }

    #[test]
    fn test_validator_deadlines_per_purpose() {
        let mut deposit = payment(PaymentPurpose::BookingDeposit, dec!(300));
        deposit.processed_at = Some(now() - Duration::days(8));
        let result = validator().validate(
            &request(&deposit, dec!(100)),
            &deposit,
            None,
            &RefundActivity::default(),
            now(),
        );
        assert!(matches!(result, Err(BookingError::RefundDeadlinePassed { .. })));

        let mut subscription = payment(PaymentPurpose::Subscription, dec!(300));
        subscription.processed_at = Some(now() - Duration::days(29));
        let result = validator().validate(
            &request(&subscription, dec!(100)),
            &subscription,
            None,
            &RefundActivity::default(),
            now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_validator_booking_state_rules() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        let mut b = booking(dec!(1000), Some("pay_1"));
        b.status = BookingStatus::InProgress;
        let result = validator().validate(
            &request(&p, dec!(100)),
            &p,
            Some(&b),
            &RefundActivity::default(),
            now(),
        );
        assert!(matches!(
            result,
            Err(BookingError::RefundBlockedByStatus(BookingStatus::InProgress))
        ));

        let mut b = booking(dec!(1000), Some("pay_1"));
        b.status = BookingStatus::CancelledByClient;
        b.refund_outcome = Some(RefundOutcome::AutomaticRefund {
            amount: dec!(600),
            fee: dec!(400),
            transaction_id: "tx_1".to_string(),
        });
        let result = validator().validate(
            &request(&p, dec!(100)),
            &p,
            Some(&b),
            &RefundActivity::default(),
            now(),
        );
        assert!(matches!(result, Err(BookingError::NotRefundable(_))));

        // An operator may still finish a refund the gateway refused
        b.refund_outcome = Some(RefundOutcome::ManualRefundRequired {
            amount: dec!(600),
            fee: dec!(400),
            error_detail: "timeout".to_string(),
        });
        let result = validator().validate(
            &request(&p, dec!(100)),
            &p,
            Some(&b),
            &RefundActivity::default(),
            now(),
        );
        assert!(result.is_ok());

        let deposit = payment(PaymentPurpose::BookingDeposit, dec!(300));
        let mut b = booking(dec!(300), Some("pay_1"));
        b.start_time = now() - Duration::minutes(5);
        let result = validator().validate(
            &request(&deposit, dec!(100)),
            &deposit,
            Some(&b),
            &RefundActivity::default(),
            now(),
        );
        assert!(matches!(result, Err(BookingError::DepositRefundAfterStart)));
    }

    #[test]
    fn test_validator_user_limits() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));

        let busy_day = RefundActivity {
            refunds_today: 5,
            refunded_this_month: dec!(0),
        };
        let result = validator().validate(&request(&p, dec!(10)), &p, None, &busy_day, now());
        assert!(matches!(result, Err(BookingError::DailyRefundLimit { limit: 5 })));

        let heavy_month = RefundActivity {
            refunds_today: 0,
            refunded_this_month: dec!(499950),
        };
        let result = validator().validate(&request(&p, dec!(100)), &p, None, &heavy_month, now());
        assert!(matches!(result, Err(BookingError::MonthlyRefundCeiling { .. })));
    }

    #[tokio::test]
    async fn test_refund_payment_records_refund() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        let payments = MockPayments::holding(Some(p.clone()));
        let gateway = Arc::new(MockGateway::ok("tx_9"));

        let receipt = orchestrator(gateway, payments.clone())
            .refund_payment(&request(&p, dec!(400)), now())
            .await
            .unwrap();

        assert_eq!(receipt.transaction_id.as_deref(), Some("tx_9"));
        assert_eq!(receipt.payment.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(receipt.payment.refunded_amount, dec!(400));
        assert_eq!(payments.held.lock().len(), 1);
        assert_eq!(payments.confirmed.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_refund_payment_surfaces_gateway_failure() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        let payments = MockPayments::holding(Some(p.clone()));
        let gateway = Arc::new(MockGateway::answering(Err(BookingError::Gateway(
            "connection reset".to_string(),
        ))));

        let result = orchestrator(gateway, payments.clone())
            .refund_payment(&request(&p, dec!(400)), now())
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), booking_core::ErrorKind::ExternalSystem);
        // The hold is given back
        assert!(payments.held.lock().is_empty());
        assert_eq!(payments.current().refunded_amount, Decimal::ZERO);
        assert!(payments.confirmed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refund_payment_unknown_payment() {
        let p = payment(PaymentPurpose::ServicePayment, dec!(1000));
        let result = orchestrator(Arc::new(MockGateway::ok("tx")), no_payments())
            .refund_payment(&request(&p, dec!(10)), now())
            .await;

        assert!(matches!(result, Err(BookingError::PaymentNotFound(_))));
    }
}
