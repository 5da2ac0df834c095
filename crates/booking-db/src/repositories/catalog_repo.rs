//! Catalog repository implementation
//!
//! Read-only access to users and bookable services.

use async_trait::async_trait;
use booking_core::{
    models::ServiceOffering, traits::CatalogRepository, BookingError, BookingResult,
};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of CatalogRepository
pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    /// Create a new catalog repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    #[instrument(skip(self))]
    async fn user_exists(&self, user_id: Uuid) -> BookingResult<bool> {
        let result: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error checking user {}: {}", user_id, e);
                BookingError::Database(format!("Failed to check user: {}", e))
            })?;

        Ok(result.0)
    }

    #[instrument(skip(self))]
    async fn find_service(&self, service_id: Uuid) -> BookingResult<Option<ServiceOffering>> {
        debug!("Finding service by id: {}", service_id);

        let result = sqlx::query_as::<sqlx::Postgres, ServiceRow>(
            r#"
            SELECT id, name, price, duration_minutes
            FROM services
            WHERE id = $1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding service {}: {}", service_id, e);
            BookingError::Database(format!("Failed to find service: {}", e))
        })?;

        Ok(result.map(Into::into))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    id: Uuid,
    name: String,
    price: Decimal,
    duration_minutes: Option<i32>,
}

impl From<ServiceRow> for ServiceOffering {
    fn from(row: ServiceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: row.price,
            duration_minutes: row.duration_minutes,
        }
    }
}
