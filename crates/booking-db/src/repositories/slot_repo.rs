//! Time slot repository implementation
//!
//! Slot inserts for one provider are serialized with a transaction-scoped
//! advisory lock keyed by the provider id; the overlap check runs under that
//! lock. The `time_slots_no_overlap` exclusion constraint backs this up and
//! its violations surface as `SlotConflict`.

use async_trait::async_trait;
use booking_core::{
    models::{ConflictingBooking, SlotKind, TimeSlot, WorkingSchedule},
    traits::SlotRepository,
    BookingError, BookingResult,
};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use sqlx::{PgConnection, PgExecutor, PgPool};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// SQLSTATE for `exclusion_violation`
const EXCLUSION_VIOLATION: &str = "23P01";

/// PostgreSQL implementation of SlotRepository
pub struct PgSlotRepository {
    pool: PgPool,
}

impl PgSlotRepository {
    /// Create a new slot repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse slot kind from string
    fn parse_kind(s: &str) -> BookingResult<SlotKind> {
        SlotKind::from_str(s)
            .ok_or_else(|| BookingError::Database(format!("Unknown slot kind: {}", s)))
    }
}

/// Weekday from its Monday-based index
pub(crate) fn weekday_from_index(index: i16) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Serialize calendar writes for one provider until the transaction ends
pub(crate) async fn lock_provider(conn: &mut PgConnection, provider_id: Uuid) -> BookingResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(provider_id)
        .execute(conn)
        .await
        .map_err(|e| {
            error!("Failed to lock calendar of provider {}: {}", provider_id, e);
            BookingError::Transaction(format!("Failed to lock provider calendar: {}", e))
        })?;

    Ok(())
}

/// Slots of a provider intersecting `[start, end)`
pub(crate) async fn overlapping_slots<'e, E>(
    executor: E,
    provider_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> BookingResult<Vec<ConflictingBooking>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<sqlx::Postgres, ConflictRow>(
        r#"
        SELECT
            s.id AS slot_id, s.booking_id, b.booking_number,
            s.start_time, s.end_time, s.kind
        FROM time_slots s
        LEFT JOIN bookings b ON b.id = s.booking_id
        WHERE s.provider_id = $1
            AND s.start_time < $3
            AND s.end_time > $2
        ORDER BY s.start_time
        "#,
    )
    .bind(provider_id)
    .bind(start)
    .bind(end)
    .fetch_all(executor)
    .await
    .map_err(|e| {
        error!("Database error checking overlaps for provider {}: {}", provider_id, e);
        BookingError::Database(format!("Failed to check slot overlap: {}", e))
    })?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Insert a slot inside an open transaction
pub(crate) async fn insert_slot(conn: &mut PgConnection, slot: &TimeSlot) -> BookingResult<()> {
    sqlx::query(
        r#"
        INSERT INTO time_slots (id, provider_id, booking_id, start_time, end_time, kind, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(slot.id)
    .bind(slot.provider_id)
    .bind(slot.booking_id)
    .bind(slot.start_time)
    .bind(slot.end_time)
    .bind(slot.kind.to_string())
    .bind(&slot.notes)
    .execute(conn)
    .await
    .map_err(|e| {
        if is_exclusion_violation(&e) {
            warn!(
                "Slot {} - {} rejected by overlap constraint",
                slot.start_time, slot.end_time
            );
            return BookingError::SlotConflict {
                booking_number: None,
                start: slot.start_time,
                end: slot.end_time,
            };
        }
        error!("Database error inserting slot: {}", e);
        BookingError::Database(format!("Failed to insert slot: {}", e))
    })?;

    Ok(())
}

/// Slots owned by a booking
pub(crate) async fn slots_of_booking<'e, E>(
    executor: E,
    booking_id: Uuid,
) -> BookingResult<Vec<TimeSlot>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<sqlx::Postgres, SlotRow>(
        r#"
        SELECT id, provider_id, booking_id, start_time, end_time, kind, notes
        FROM time_slots
        WHERE booking_id = $1
        ORDER BY start_time
        "#,
    )
    .bind(booking_id)
    .fetch_all(executor)
    .await
    .map_err(|e| {
        error!("Database error loading slots of booking {}: {}", booking_id, e);
        BookingError::Database(format!("Failed to load slots: {}", e))
    })?;

    rows.into_iter().map(TryInto::try_into).collect()
}

fn is_exclusion_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(EXCLUSION_VIOLATION),
        _ => false,
    }
}

#[async_trait]
impl SlotRepository for PgSlotRepository {
    #[instrument(skip(self))]
    async fn find_overlapping(
        &self,
        provider_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BookingResult<Vec<ConflictingBooking>> {
        debug!("Finding slots of {} overlapping {} - {}", provider_id, start, end);
        overlapping_slots(&self.pool, provider_id, start, end).await
    }

    #[instrument(skip(self, slot), fields(provider_id = %slot.provider_id))]
    async fn reserve_slot(&self, slot: &TimeSlot) -> BookingResult<TimeSlot> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            BookingError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        lock_provider(&mut tx, slot.provider_id).await?;

        let conflicts =
            overlapping_slots(&mut *tx, slot.provider_id, slot.start_time, slot.end_time).await?;
        if let Some(conflict) = conflicts.into_iter().next() {
            warn!(
                "Slot {} - {} for provider {} conflicts with slot {}",
                slot.start_time, slot.end_time, slot.provider_id, conflict.slot_id
            );
            return Err(conflict.into());
        }

        insert_slot(&mut tx, slot).await?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            BookingError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        debug!("Reserved slot {}", slot.id);
        Ok(slot.clone())
    }

    #[instrument(skip(self))]
    async fn release_slots(&self, booking_id: Uuid) -> BookingResult<u64> {
        let result = sqlx::query("DELETE FROM time_slots WHERE booking_id = $1")
            .bind(booking_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error releasing slots of booking {}: {}", booking_id, e);
                BookingError::Database(format!("Failed to release slots: {}", e))
            })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn find_slot(&self, slot_id: Uuid) -> BookingResult<Option<TimeSlot>> {
        let result = sqlx::query_as::<sqlx::Postgres, SlotRow>(
            r#"
            SELECT id, provider_id, booking_id, start_time, end_time, kind, notes
            FROM time_slots
            WHERE id = $1
            "#,
        )
        .bind(slot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding slot {}: {}", slot_id, e);
            BookingError::Database(format!("Failed to find slot: {}", e))
        })?;

        result.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn release_slot(&self, slot_id: Uuid) -> BookingResult<bool> {
        let result = sqlx::query("DELETE FROM time_slots WHERE id = $1")
            .bind(slot_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error releasing slot {}: {}", slot_id, e);
                BookingError::Database(format!("Failed to release slot: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn get_working_hours(
        &self,
        provider_id: Uuid,
        weekday: Weekday,
    ) -> BookingResult<Option<WorkingSchedule>> {
        let result = sqlx::query_as::<sqlx::Postgres, ScheduleRow>(
            r#"
            SELECT provider_id, weekday, is_working_day,
                   start_time, end_time, break_start, break_end
            FROM working_schedules
            WHERE provider_id = $1 AND weekday = $2
            "#,
        )
        .bind(provider_id)
        .bind(weekday.num_days_from_monday() as i16)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading schedule of {}: {}", provider_id, e);
            BookingError::Database(format!("Failed to load working schedule: {}", e))
        })?;

        result
            .map(|row| {
                let weekday = weekday_from_index(row.weekday).ok_or_else(|| {
                    BookingError::Database(format!("Invalid weekday index {}", row.weekday))
                })?;
                Ok(WorkingSchedule {
                    provider_id: row.provider_id,
                    weekday,
                    is_working_day: row.is_working_day,
                    start_time: row.start_time,
                    end_time: row.end_time,
                    break_start: row.break_start,
                    break_end: row.break_end,
                })
            })
            .transpose()
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ConflictRow {
    slot_id: Uuid,
    booking_id: Option<Uuid>,
    booking_number: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    kind: String,
}

impl TryFrom<ConflictRow> for ConflictingBooking {
    type Error = BookingError;

    fn try_from(row: ConflictRow) -> BookingResult<Self> {
        Ok(Self {
            slot_id: row.slot_id,
            booking_id: row.booking_id,
            booking_number: row.booking_number,
            start_time: row.start_time,
            end_time: row.end_time,
            kind: PgSlotRepository::parse_kind(&row.kind)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    provider_id: Uuid,
    booking_id: Option<Uuid>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    kind: String,
    notes: Option<String>,
}

impl TryFrom<SlotRow> for TimeSlot {
    type Error = BookingError;

    fn try_from(row: SlotRow) -> BookingResult<Self> {
        Ok(Self {
            id: row.id,
            provider_id: row.provider_id,
            booking_id: row.booking_id,
            start_time: row.start_time,
            end_time: row.end_time,
            kind: PgSlotRepository::parse_kind(&row.kind)?,
            notes: row.notes,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    provider_id: Uuid,
    weekday: i16,
    is_working_day: bool,
    start_time: NaiveTime,
    end_time: NaiveTime,
    break_start: Option<NaiveTime>,
    break_end: Option<NaiveTime>,
}
