//! Booking repository implementation
//!
//! Provides PostgreSQL-backed storage for the booking aggregate. Every state
//! change is a single transaction guarded by the expected prior status, so a
//! concurrent or repeated transition fails instead of applying twice.

use async_trait::async_trait;
use booking_core::{
    models::{
        Booking, BookingDetails, BookingServiceLine, BookingStatus, BookingType,
        CancellationRecord, ClientStatistics, CompletionBonuses, CompletionRecord, NewBooking,
        ProviderStatistics, RefundOutcome, RescheduleRecord, SettlementOutcome, StatusChange,
    },
    traits::BookingRepository,
    BookingError, BookingResult,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::slot_repo::{insert_slot, lock_provider, overlapping_slots, slots_of_booking};
use super::statistics_repo::{
    client_row_for_update, provider_row_for_update, save_client, save_provider,
};

const BOOKING_COLUMNS: &str = r#"
    id, booking_number, client_id, provider_id, service_id,
    booking_type, status, start_time, end_time, duration_minutes,
    base_price, service_price, delivery_fee, discount_amount,
    deposit_amount, total_price, paid_amount, payment_reference,
    client_address, client_phone, provider_address, platform, meeting_link, notes,
    cancelled_at, cancelled_by, cancellation_reason,
    cancellation_fee_amount, cancellation_fee_percent, refund_outcome,
    completed_at, service_quality, completion_notes, bonuses,
    review_available_until, settlement, reschedule_count,
    created_at, updated_at
"#;

/// PostgreSQL implementation of BookingRepository
pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    /// Create a new booking repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse booking status from string
    fn parse_status(s: &str) -> BookingResult<BookingStatus> {
        BookingStatus::from_str(s)
            .ok_or_else(|| BookingError::Database(format!("Unknown booking status: {}", s)))
    }

    /// Parse booking type from string
    fn parse_type(s: &str) -> BookingResult<BookingType> {
        BookingType::from_str(s)
            .ok_or_else(|| BookingError::Database(format!("Unknown booking type: {}", s)))
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

    /// Attach service lines and slots to a loaded row
    async fn hydrate(&self, row: BookingRow) -> BookingResult<Booking> {
        let mut booking: Booking = row.try_into()?;
        booking.service_lines = self.load_lines(booking.id).await?;
        booking.slots = slots_of_booking(&self.pool, booking.id).await?;
        Ok(booking)
    }

    async fn load_lines(&self, booking_id: Uuid) -> BookingResult<Vec<BookingServiceLine>> {
        let rows = sqlx::query_as::<sqlx::Postgres, ServiceLineRow>(
            r#"
            SELECT id, booking_id, service_id, quantity, unit_price, total_price,
                   duration_minutes, start_offset_minutes, sort_order, notes
            FROM booking_service_lines
            WHERE booking_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading lines of booking {}: {}", booking_id, e);
            BookingError::Database(format!("Failed to load service lines: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn require(&self, id: Uuid) -> BookingResult<Booking> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| BookingError::BookingNotFound(id.to_string()))
    }

    /// Error for a guarded update that matched no row
    async fn guard_failure(
        conn: &mut PgConnection,
        id: Uuid,
        operation: &'static str,
    ) -> BookingError {
        let current: Result<Option<(String,)>, _> =
            sqlx::query_as("SELECT status FROM bookings WHERE id = $1")
                .bind(id)
                .fetch_optional(conn)
                .await;

        match current {
            Ok(Some((status,))) => {
                let status = match Self::parse_status(&status) {
                    Ok(status) => status,
                    Err(e) => return e,
                };
                warn!("Cannot {} booking {} in status {}", operation, id, status);
                BookingError::InvalidTransition { status, operation }
            }
            Ok(None) => BookingError::BookingNotFound(id.to_string()),
            Err(e) => BookingError::Database(format!("Failed to read booking status: {}", e)),
        }
    }

    async fn insert_booking(conn: &mut PgConnection, booking: &Booking) -> BookingResult<()> {
        let d = &booking.details;
        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, booking_number, client_id, provider_id, service_id,
                booking_type, status, start_time, end_time, duration_minutes,
                base_price, service_price, delivery_fee, discount_amount,
                deposit_amount, total_price, paid_amount, payment_reference,
                client_address, client_phone, provider_address, platform,
                meeting_link, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.booking_number)
        .bind(booking.client_id)
        .bind(booking.provider_id)
        .bind(booking.service_id)
        .bind(booking.booking_type.to_string())
        .bind(booking.status.to_string())
        .bind(booking.start_time)
        .bind(booking.end_time)
        .bind(booking.duration_minutes)
        .bind(booking.base_price)
        .bind(booking.service_price)
        .bind(booking.delivery_fee)
        .bind(booking.discount_amount)
        .bind(booking.deposit_amount)
        .bind(booking.total_price)
        .bind(booking.paid_amount)
        .bind(&booking.payment_reference)
        .bind(&d.client_address)
        .bind(&d.client_phone)
        .bind(&d.provider_address)
        .bind(&d.platform)
        .bind(&d.meeting_link)
        .bind(&d.notes)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(conn)
        .await
        .map_err(|e| {
            error!("Database error creating booking {}: {}", booking.booking_number, e);
            BookingError::Database(format!("Failed to create booking: {}", e))
        })?;

        Ok(())
    }

    async fn insert_line(conn: &mut PgConnection, line: &BookingServiceLine) -> BookingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO booking_service_lines (
                id, booking_id, service_id, quantity, unit_price, total_price,
                duration_minutes, start_offset_minutes, sort_order, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(line.id)
        .bind(line.booking_id)
        .bind(line.service_id)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.total_price)
        .bind(line.duration_minutes)
        .bind(line.start_offset_minutes)
        .bind(line.sort_order)
        .bind(&line.notes)
        .execute(conn)
        .await
        .map_err(|e| {
            error!("Database error creating service line: {}", e);
            BookingError::Database(format!("Failed to create service line: {}", e))
        })?;

        Ok(())
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        debug!("Finding booking by id: {}", id);

        let query = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row = sqlx::query_as::<sqlx::Postgres, BookingRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding booking {}: {}", id, e);
                BookingError::Database(format!("Failed to find booking: {}", e))
            })?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_number(&self, booking_number: &str) -> BookingResult<Option<Booking>> {
        debug!("Finding booking by number: {}", booking_number);

        let query = format!(
            "SELECT {} FROM bookings WHERE booking_number = $1",
            BOOKING_COLUMNS
        );
        let row = sqlx::query_as::<sqlx::Postgres, BookingRow>(&query)
            .bind(booking_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding booking {}: {}", booking_number, e);
                BookingError::Database(format!("Failed to find booking: {}", e))
            })?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn client_has_bookings(&self, client_id: Uuid) -> BookingResult<bool> {
        let result: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bookings WHERE client_id = $1)")
                .bind(client_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error checking bookings of {}: {}", client_id, e);
                    BookingError::Database(format!("Failed to check client bookings: {}", e))
                })?;

        Ok(result.0)
    }

    #[instrument(skip(self, new_booking), fields(booking_number = %new_booking.booking.booking_number))]
    async fn create_with_slots(&self, new_booking: &NewBooking) -> BookingResult<Booking> {
        let booking = &new_booking.booking;
        let mut tx = self.begin().await?;

        lock_provider(&mut tx, booking.provider_id).await?;

        // Re-check under the provider lock
        for slot in &new_booking.slots {
            let conflicts =
                overlapping_slots(&mut *tx, slot.provider_id, slot.start_time, slot.end_time)
                    .await?;
            if let Some(conflict) = conflicts.into_iter().next() {
                warn!(
                    "Booking {} lost slot {} - {} to slot {}",
                    booking.booking_number, slot.start_time, slot.end_time, conflict.slot_id
                );
                return Err(conflict.into());
            }
        }

        Self::insert_booking(&mut tx, booking).await?;
        for line in &new_booking.service_lines {
            Self::insert_line(&mut tx, line).await?;
        }
        for slot in &new_booking.slots {
            insert_slot(&mut tx, slot).await?;
        }

        Self::commit(tx).await?;

        info!(
            "Created booking {} for provider {} at {}",
            booking.booking_number, booking.provider_id, booking.start_time
        );

        let mut created = booking.clone();
        created.service_lines = new_booking.service_lines.clone();
        created.slots = new_booking.slots.clone();
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn transition_status(&self, change: &StatusChange) -> BookingResult<Booking> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $3,
                updated_at = $4
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(change.booking_id)
        .bind(change.expected_status.to_string())
        .bind(change.new_status.to_string())
        .bind(change.at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error updating booking {}: {}", change.booking_id, e);
            BookingError::Database(format!("Failed to update booking status: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(Self::guard_failure(&mut tx, change.booking_id, change.operation()).await);
        }

        Self::commit(tx).await?;
        self.require(change.booking_id).await
    }

    #[instrument(skip(self, record), fields(booking_id = %record.booking_id))]
    async fn apply_cancellation(&self, record: &CancellationRecord) -> BookingResult<Booking> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $3,
                cancelled_at = $4,
                cancelled_by = $5,
                cancellation_reason = $6,
                cancellation_fee_amount = $7,
                cancellation_fee_percent = $8,
                updated_at = $4
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(record.booking_id)
        .bind(record.expected_status.to_string())
        .bind(record.new_status.to_string())
        .bind(record.cancelled_at)
        .bind(record.cancelled_by)
        .bind(&record.reason)
        .bind(record.fee_amount)
        .bind(record.fee_percent)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error cancelling booking {}: {}", record.booking_id, e);
            BookingError::Database(format!("Failed to cancel booking: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(Self::guard_failure(&mut tx, record.booking_id, "cancel").await);
        }

        let released = sqlx::query("DELETE FROM time_slots WHERE booking_id = $1")
            .bind(record.booking_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error releasing slots of {}: {}", record.booking_id, e);
                BookingError::Database(format!("Failed to release slots: {}", e))
            })?;

        Self::commit(tx).await?;

        debug!(
            "Cancelled booking {}, released {} slots",
            record.booking_id,
            released.rows_affected()
        );

        self.require(record.booking_id).await
    }

    #[instrument(skip(self, record), fields(booking_id = %record.booking_id))]
    async fn apply_reschedule(&self, record: &RescheduleRecord) -> BookingResult<Booking> {
        let mut tx = self.begin().await?;

        lock_provider(&mut tx, record.provider_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET start_time = $4,
                end_time = $5,
                duration_minutes = $6,
                reschedule_count = reschedule_count + 1,
                updated_at = $7
            WHERE id = $1 AND status = $2 AND reschedule_count = $3
            "#,
        )
        .bind(record.booking_id)
        .bind(record.expected_status.to_string())
        .bind(record.expected_count)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.duration_minutes)
        .bind(record.rescheduled_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error rescheduling booking {}: {}", record.booking_id, e);
            BookingError::Database(format!("Failed to reschedule booking: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(Self::guard_failure(&mut tx, record.booking_id, "reschedule").await);
        }

        sqlx::query("DELETE FROM time_slots WHERE booking_id = $1")
            .bind(record.booking_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error releasing slots of {}: {}", record.booking_id, e);
                BookingError::Database(format!("Failed to release slots: {}", e))
            })?;

        // Own slots are gone, so only foreign slots can conflict
        for slot in &record.slots {
            let conflicts =
                overlapping_slots(&mut *tx, slot.provider_id, slot.start_time, slot.end_time)
                    .await?;
            if let Some(conflict) = conflicts.into_iter().next() {
                warn!(
                    "Reschedule of {} lost slot {} - {} to slot {}",
                    record.booking_id, slot.start_time, slot.end_time, conflict.slot_id
                );
                return Err(conflict.into());
            }
            insert_slot(&mut tx, slot).await?;
        }

        Self::commit(tx).await?;

        info!(
            "Rescheduled booking {} to {} - {}",
            record.booking_id, record.start_time, record.end_time
        );

        self.require(record.booking_id).await
    }

    #[instrument(skip(self, outcome))]
    async fn record_refund_outcome(
        &self,
        booking_id: Uuid,
        outcome: &RefundOutcome,
    ) -> BookingResult<()> {
        sqlx::query("UPDATE bookings SET refund_outcome = $2, updated_at = NOW() WHERE id = $1")
            .bind(booking_id)
            .bind(Json(outcome))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error recording refund of {}: {}", booking_id, e);
                BookingError::Database(format!("Failed to record refund outcome: {}", e))
            })?;

        Ok(())
    }

    #[instrument(skip(self, record), fields(booking_id = %record.booking_id))]
    async fn apply_completion(&self, record: &CompletionRecord) -> BookingResult<Booking> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'completed',
                completed_at = $3,
                service_quality = $4,
                completion_notes = $5,
                bonuses = $6,
                review_available_until = $7,
                updated_at = $3
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(record.booking_id)
        .bind(record.expected_status.to_string())
        .bind(record.completed_at)
        .bind(record.quality)
        .bind(&record.notes)
        .bind(Json(&record.bonuses))
        .bind(record.review_available_until)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error completing booking {}: {}", record.booking_id, e);
            BookingError::Database(format!("Failed to complete booking: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(Self::guard_failure(&mut tx, record.booking_id, "complete").await);
        }

        let mut client: ClientStatistics = client_row_for_update(&mut tx, record.client_id).await?;
        client.record_completion(
            record.client_spent,
            record.bonuses.client_cashback,
            record.bonuses.loyalty_points,
            record.completed_at,
        );
        save_client(&mut tx, &client).await?;

        let mut provider: ProviderStatistics =
            provider_row_for_update(&mut tx, record.provider_id).await?;
        provider.record_completion(
            record.provider_net_earnings,
            record.bonuses.provider_quality_bonus,
            record.quality,
            record.completed_at,
        );
        save_provider(&mut tx, &provider).await?;

        Self::commit(tx).await?;

        self.require(record.booking_id).await
    }

    #[instrument(skip(self, settlement))]
    async fn record_settlement(
        &self,
        booking_id: Uuid,
        settlement: &SettlementOutcome,
    ) -> BookingResult<()> {
        sqlx::query("UPDATE bookings SET settlement = $2, updated_at = NOW() WHERE id = $1")
            .bind(booking_id)
            .bind(Json(settlement))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error recording settlement of {}: {}", booking_id, e);
                BookingError::Database(format!("Failed to record settlement: {}", e))
            })?;

        Ok(())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    booking_number: String,
    client_id: Uuid,
    provider_id: Uuid,
    service_id: Uuid,
    booking_type: String,
    status: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_minutes: i32,
    base_price: Decimal,
    service_price: Decimal,
    delivery_fee: Decimal,
    discount_amount: Decimal,
    deposit_amount: Decimal,
    total_price: Decimal,
    paid_amount: Decimal,
    payment_reference: Option<String>,
    client_address: Option<String>,
    client_phone: Option<String>,
    provider_address: Option<String>,
    platform: Option<String>,
    meeting_link: Option<String>,
    notes: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<Uuid>,
    cancellation_reason: Option<String>,
    cancellation_fee_amount: Option<Decimal>,
    cancellation_fee_percent: Option<Decimal>,
    refund_outcome: Option<Json<RefundOutcome>>,
    completed_at: Option<DateTime<Utc>>,
    service_quality: Option<i16>,
    completion_notes: Option<String>,
    bonuses: Option<Json<CompletionBonuses>>,
    review_available_until: Option<DateTime<Utc>>,
    settlement: Option<Json<SettlementOutcome>>,
    reschedule_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = BookingError;

    fn try_from(row: BookingRow) -> BookingResult<Self> {
        Ok(Self {
            id: row.id,
            booking_number: row.booking_number,
            client_id: row.client_id,
            provider_id: row.provider_id,
            service_id: row.service_id,
            booking_type: PgBookingRepository::parse_type(&row.booking_type)?,
            status: PgBookingRepository::parse_status(&row.status)?,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_minutes: row.duration_minutes,
            base_price: row.base_price,
            service_price: row.service_price,
            delivery_fee: row.delivery_fee,
            discount_amount: row.discount_amount,
            deposit_amount: row.deposit_amount,
            total_price: row.total_price,
            paid_amount: row.paid_amount,
            payment_reference: row.payment_reference,
            details: BookingDetails {
                client_address: row.client_address,
                client_phone: row.client_phone,
                provider_address: row.provider_address,
                platform: row.platform,
                meeting_link: row.meeting_link,
                notes: row.notes,
            },
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by,
            cancellation_reason: row.cancellation_reason,
            cancellation_fee_amount: row.cancellation_fee_amount,
            cancellation_fee_percent: row.cancellation_fee_percent,
            refund_outcome: row.refund_outcome.map(|j| j.0),
            completed_at: row.completed_at,
            service_quality: row.service_quality,
            completion_notes: row.completion_notes,
            bonuses: row.bonuses.map(|j| j.0),
            review_available_until: row.review_available_until,
            settlement: row.settlement.map(|j| j.0),
            reschedule_count: row.reschedule_count,
            service_lines: Vec::new(),
            slots: Vec::new(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceLineRow {
    id: Uuid,
    booking_id: Uuid,
    service_id: Uuid,
    quantity: i32,
    unit_price: Decimal,
    total_price: Decimal,
    duration_minutes: i32,
    start_offset_minutes: i32,
    sort_order: i32,
    notes: Option<String>,
}

impl From<ServiceLineRow> for BookingServiceLine {
    fn from(row: ServiceLineRow) -> Self {
        Self {
            id: row.id,
            booking_id: row.booking_id,
            service_id: row.service_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            total_price: row.total_price,
            duration_minutes: row.duration_minutes,
            start_offset_minutes: row.start_offset_minutes,
            sort_order: row.sort_order,
            notes: row.notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(
            PgBookingRepository::parse_status("confirmed").unwrap(),
            BookingStatus::Confirmed
        );
        assert_eq!(
            PgBookingRepository::parse_status("cancelled_by_client").unwrap(),
            BookingStatus::CancelledByClient
        );
    }

    #[test]
    fn test_unknown_stored_values_are_database_errors() {
        assert!(matches!(
            PgBookingRepository::parse_status("archived"),
            Err(BookingError::Database(_))
        ));
        assert!(matches!(
            PgBookingRepository::parse_type("home_visit"),
            Err(BookingError::Database(_))
        ));
    }

    #[test]
    fn test_parse_type() {
        assert_eq!(
            PgBookingRepository::parse_type("on_site").unwrap(),
            BookingType::OnSite
        );
        assert_eq!(
            PgBookingRepository::parse_type("bundle").unwrap(),
            BookingType::Bundle
        );
    }

    #[test]
    fn test_select_lists_every_mapped_column() {
        for column in [
            "refund_outcome",
            "settlement",
            "review_available_until",
            "platform",
            "reschedule_count",
        ] {
            assert!(BOOKING_COLUMNS.contains(column));
        }
    }
}
