//! Payment and refund repository implementation

use async_trait::async_trait;
use booking_core::{
    models::{
        NewRefund, PaymentPurpose, PaymentRecord, PaymentStatus, RefundActivity, RefundStatus,
    },
    traits::PaymentRepository,
    BookingError, BookingResult,
};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = r#"
    id, user_id, booking_id, purpose, status, amount,
    refunded_amount, gateway_reference, processed_at
"#;

/// PostgreSQL implementation of PaymentRepository
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    /// Create a new payment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse payment status from string
    fn parse_status(s: &str) -> BookingResult<PaymentStatus> {
        PaymentStatus::from_str(s)
            .ok_or_else(|| BookingError::Database(format!("Unknown payment status: {}", s)))
    }

    /// Parse payment purpose from string
    fn parse_purpose(s: &str) -> BookingResult<PaymentPurpose> {
        PaymentPurpose::from_str(s)
            .ok_or_else(|| BookingError::Database(format!("Unknown payment purpose: {}", s)))
    }

    async fn begin(&self) -> BookingResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            BookingError::Transaction(format!("Failed to start transaction: {}", e))
        })
    }

    async fn commit(tx: sqlx::Transaction<'static, sqlx::Postgres>) -> BookingResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            BookingError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }
}

/// Start of the current UTC day and month, the windows for refund limits
pub(crate) fn activity_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);
    let month_start = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(day_start);
    (day_start, month_start)
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    #[instrument(skip(self))]
    async fn find_payment(&self, payment_id: Uuid) -> BookingResult<Option<PaymentRecord>> {
        debug!("Finding payment by id: {}", payment_id);

        let query = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&query)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding payment {}: {}", payment_id, e);
                BookingError::Database(format!("Failed to find payment: {}", e))
            })?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn find_payment_by_reference(
        &self,
        gateway_reference: &str,
    ) -> BookingResult<Option<PaymentRecord>> {
        debug!("Finding payment by reference: {}", gateway_reference);

        let query = format!(
            r#"
            SELECT {} FROM payments
            WHERE gateway_reference = $1 AND purpose = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&query)
            .bind(gateway_reference)
            .bind(PaymentPurpose::ServicePayment.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding payment {}: {}", gateway_reference, e);
                BookingError::Database(format!("Failed to find payment: {}", e))
            })?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn refund_activity(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<RefundActivity> {
        let (day_start, month_start) = activity_window(now);

        let (today, month_total): (i64, Decimal) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE created_at >= $2),
                COALESCE(SUM(amount), 0)
            FROM refunds
            WHERE user_id = $1 AND created_at >= $3
            "#,
        )
        .bind(user_id)
        .bind(day_start)
        .bind(month_start)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading refunds of {}: {}", user_id, e);
            BookingError::Database(format!("Failed to load refund activity: {}", e))
        })?;

        Ok(RefundActivity {
            refunds_today: u32::try_from(today).unwrap_or(u32::MAX),
            refunded_this_month: month_total,
        })
    }

    #[instrument(skip(self, refund), fields(payment_id = %refund.payment_id))]
    async fn reserve_refund(&self, refund: &NewRefund) -> BookingResult<PaymentRecord> {
        let mut tx = self.begin().await?;

        let mut payment = lock_payment(&mut tx, refund.payment_id).await?;
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

        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, payment_id, user_id, amount, reason, status, transaction_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(refund.id)
        .bind(refund.payment_id)
        .bind(refund.user_id)
        .bind(refund.amount)
        .bind(&refund.reason)
        .bind(RefundStatus::Pending.to_string())
        .bind(&refund.transaction_id)
        .bind(refund.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert refund: {}", e);
            BookingError::Database(format!("Failed to reserve refund: {}", e))
        })?;

        payment.apply_refund(refund.amount);
        save_payment(&mut tx, &payment).await?;
        Self::commit(tx).await?;

        info!(
            "Reserved refund {} of {} on payment {} ({})",
            refund.id, refund.amount, payment.id, payment.status
        );

        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn confirm_refund(
        &self,
        refund_id: Uuid,
        transaction_id: Option<&str>,
    ) -> BookingResult<PaymentRecord> {
        let mut tx = self.begin().await?;

        let pending = pending_refund(&mut tx, refund_id).await?;
        let payment = lock_payment(&mut tx, pending.payment_id).await?;

        sqlx::query(
            r#"
            UPDATE refunds
            SET status = $2,
                transaction_id = $3
            WHERE id = $1
            "#,
        )
        .bind(refund_id)
        .bind(RefundStatus::Completed.to_string())
        .bind(transaction_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to confirm refund {}: {}", refund_id, e);
            BookingError::Database(format!("Failed to confirm refund: {}", e))
        })?;

        Self::commit(tx).await?;

        debug!("Confirmed refund {} on payment {}", refund_id, payment.id);
        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn release_refund(&self, refund_id: Uuid) -> BookingResult<PaymentRecord> {
        let mut tx = self.begin().await?;

        let pending = pending_refund(&mut tx, refund_id).await?;
        let mut payment = lock_payment(&mut tx, pending.payment_id).await?;

        sqlx::query("DELETE FROM refunds WHERE id = $1")
            .bind(refund_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to release refund {}: {}", refund_id, e);
                BookingError::Database(format!("Failed to release refund: {}", e))
            })?;

        payment.revert_refund(pending.amount);
        save_payment(&mut tx, &payment).await?;
        Self::commit(tx).await?;

        warn!(
            "Released refund {} of {} on payment {}",
            refund_id, pending.amount, payment.id
        );

        Ok(payment)
    }
}

/// Payment row locked until the transaction ends
async fn lock_payment(conn: &mut PgConnection, payment_id: Uuid) -> BookingResult<PaymentRecord> {
    let row = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
        PAYMENT_COLUMNS
    ))
    .bind(payment_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| {
        error!("Failed to lock payment: {}", e);
        BookingError::Database(format!("Failed to lock payment: {}", e))
    })?
    .ok_or(BookingError::PaymentNotFound(payment_id))?;

    row.try_into()
}

async fn save_payment(conn: &mut PgConnection, payment: &PaymentRecord) -> BookingResult<()> {
    sqlx::query(
        r#"
        UPDATE payments
        SET refunded_amount = $2,
            status = $3,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(payment.id)
    .bind(payment.refunded_amount)
    .bind(payment.status.to_string())
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Failed to update payment {}: {}", payment.id, e);
        BookingError::Database(format!("Failed to update payment: {}", e))
    })?;

    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct PendingRefundRow {
    payment_id: Uuid,
    amount: Decimal,
}

/// Reserved refund, locked; fails when it was already confirmed or released
async fn pending_refund(conn: &mut PgConnection, refund_id: Uuid) -> BookingResult<PendingRefundRow> {
    sqlx::query_as::<sqlx::Postgres, PendingRefundRow>(
        "SELECT payment_id, amount FROM refunds WHERE id = $1 AND status = $2 FOR UPDATE",
    )
    .bind(refund_id)
    .bind(RefundStatus::Pending.to_string())
    .fetch_optional(conn)
    .await
    .map_err(|e| {
        error!("Failed to load refund {}: {}", refund_id, e);
        BookingError::Database(format!("Failed to load refund: {}", e))
    })?
    .ok_or_else(|| BookingError::Database(format!("Refund {} is not pending", refund_id)))
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    booking_id: Option<Uuid>,
    purpose: String,
    status: String,
    amount: Decimal,
    refunded_amount: Decimal,
    gateway_reference: Option<String>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = BookingError;

    fn try_from(row: PaymentRow) -> BookingResult<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            booking_id: row.booking_id,
            purpose: PgPaymentRepository::parse_purpose(&row.purpose)?,
            status: PgPaymentRepository::parse_status(&row.status)?,
            amount: row.amount,
            refunded_amount: row.refunded_amount,
            gateway_reference: row.gateway_reference,
            processed_at: row.processed_at,
        })
    }
}
