//! Provider and client statistics repository
//!
//! Statistics rows are created lazily. Writes happen only inside the booking
//! completion transaction, through the row-locking helpers below.

use async_trait::async_trait;
use booking_core::{
    models::{ClientStatistics, ProviderStatistics},
    traits::StatisticsRepository,
    BookingError, BookingResult,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{error, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of StatisticsRepository
pub struct PgStatisticsRepository {
    pool: PgPool,
}

impl PgStatisticsRepository {
    /// Create a new statistics repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Lock (creating if needed) the provider's statistics row
pub(crate) async fn provider_row_for_update(
    conn: &mut PgConnection,
    provider_id: Uuid,
) -> BookingResult<ProviderStatistics> {
    sqlx::query("INSERT INTO provider_statistics (provider_id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(provider_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to create statistics for provider {}: {}", provider_id, e);
            BookingError::Database(format!("Failed to create provider statistics: {}", e))
        })?;

    let row = sqlx::query_as::<sqlx::Postgres, ProviderStatsRow>(
        r#"
        SELECT provider_id, completed_bookings, total_earned, average_rating,
               rating_count, bonus_earned, last_completed_at
        FROM provider_statistics
        WHERE provider_id = $1
        FOR UPDATE
        "#,
    )
    .bind(provider_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to lock statistics of provider {}: {}", provider_id, e);
        BookingError::Database(format!("Failed to lock provider statistics: {}", e))
    })?;

    Ok(row.into())
}

pub(crate) async fn save_provider(
    conn: &mut PgConnection,
    stats: &ProviderStatistics,
) -> BookingResult<()> {
    sqlx::query(
        r#"
        UPDATE provider_statistics
        SET completed_bookings = $2,
            total_earned = $3,
            average_rating = $4,
            rating_count = $5,
            bonus_earned = $6,
            last_completed_at = $7
        WHERE provider_id = $1
        "#,
    )
    .bind(stats.provider_id)
    .bind(stats.completed_bookings)
    .bind(stats.total_earned)
    .bind(stats.average_rating)
    .bind(stats.rating_count)
    .bind(stats.bonus_earned)
    .bind(stats.last_completed_at)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Failed to update statistics of provider {}: {}", stats.provider_id, e);
        BookingError::Database(format!("Failed to update provider statistics: {}", e))
    })?;

    Ok(())
}

/// Lock (creating if needed) the client's statistics row
pub(crate) async fn client_row_for_update(
    conn: &mut PgConnection,
    client_id: Uuid,
) -> BookingResult<ClientStatistics> {
    sqlx::query("INSERT INTO client_statistics (client_id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(client_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to create statistics for client {}: {}", client_id, e);
            BookingError::Database(format!("Failed to create client statistics: {}", e))
        })?;

    let row = sqlx::query_as::<sqlx::Postgres, ClientStatsRow>(
        r#"
        SELECT client_id, completed_bookings, total_spent, loyalty_points,
               bonus_balance, last_completed_at
        FROM client_statistics
        WHERE client_id = $1
        FOR UPDATE
        "#,
    )
    .bind(client_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        error!("Failed to lock statistics of client {}: {}", client_id, e);
        BookingError::Database(format!("Failed to lock client statistics: {}", e))
    })?;

    Ok(row.into())
}

pub(crate) async fn save_client(
    conn: &mut PgConnection,
    stats: &ClientStatistics,
) -> BookingResult<()> {
    sqlx::query(
        r#"
        UPDATE client_statistics
        SET completed_bookings = $2,
            total_spent = $3,
            loyalty_points = $4,
            bonus_balance = $5,
            last_completed_at = $6
        WHERE client_id = $1
        "#,
    )
    .bind(stats.client_id)
    .bind(stats.completed_bookings)
    .bind(stats.total_spent)
    .bind(stats.loyalty_points)
    .bind(stats.bonus_balance)
    .bind(stats.last_completed_at)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Failed to update statistics of client {}: {}", stats.client_id, e);
        BookingError::Database(format!("Failed to update client statistics: {}", e))
    })?;

    Ok(())
}

#[async_trait]
impl StatisticsRepository for PgStatisticsRepository {
    #[instrument(skip(self))]
    async fn provider_statistics(&self, provider_id: Uuid) -> BookingResult<ProviderStatistics> {
        let row = sqlx::query_as::<sqlx::Postgres, ProviderStatsRow>(
            r#"
            SELECT provider_id, completed_bookings, total_earned, average_rating,
                   rating_count, bonus_earned, last_completed_at
            FROM provider_statistics
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading statistics of {}: {}", provider_id, e);
            BookingError::Database(format!("Failed to load provider statistics: {}", e))
        })?;

        Ok(row
            .map(Into::into)
            .unwrap_or_else(|| ProviderStatistics::empty(provider_id)))
    }

    #[instrument(skip(self))]
    async fn client_statistics(&self, client_id: Uuid) -> BookingResult<ClientStatistics> {
        let row = sqlx::query_as::<sqlx::Postgres, ClientStatsRow>(
            r#"
            SELECT client_id, completed_bookings, total_spent, loyalty_points,
                   bonus_balance, last_completed_at
            FROM client_statistics
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading statistics of {}: {}", client_id, e);
            BookingError::Database(format!("Failed to load client statistics: {}", e))
        })?;

        Ok(row
            .map(Into::into)
            .unwrap_or_else(|| ClientStatistics::empty(client_id)))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ProviderStatsRow {
    provider_id: Uuid,
    completed_bookings: i64,
    total_earned: Decimal,
    average_rating: Decimal,
    rating_count: i64,
    bonus_earned: Decimal,
    last_completed_at: Option<DateTime<Utc>>,
}

impl From<ProviderStatsRow> for ProviderStatistics {
    fn from(row: ProviderStatsRow) -> Self {
        Self {
            provider_id: row.provider_id,
            completed_bookings: row.completed_bookings,
            total_earned: row.total_earned,
            average_rating: row.average_rating,
            rating_count: row.rating_count,
            bonus_earned: row.bonus_earned,
            last_completed_at: row.last_completed_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClientStatsRow {
    client_id: Uuid,
    completed_bookings: i64,
    total_spent: Decimal,
    loyalty_points: i64,
    bonus_balance: Decimal,
    last_completed_at: Option<DateTime<Utc>>,
}

impl From<ClientStatsRow> for ClientStatistics {
    fn from(row: ClientStatsRow) -> Self {
        Self {
            client_id: row.client_id,
            completed_bookings: row.completed_bookings,
            total_spent: row.total_spent,
            loyalty_points: row.loyalty_points,
            bonus_balance: row.bonus_balance,
            last_completed_at: row.last_completed_at,
        }
    }
}
