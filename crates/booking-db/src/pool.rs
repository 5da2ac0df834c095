//! PostgreSQL connection pool management
//!
//! Provides pool creation from [`DatabaseConfig`], schema migrations and a
//! startup check that the booking tables are reachable.

use booking_core::config::DatabaseConfig;
use booking_core::{BookingError, BookingResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};

/// Tables the engine reads and writes
const REQUIRED_TABLES: &[&str] = &[
    "users",
    "bookings",
    "booking_service_lines",
    "time_slots",
    "working_schedules",
    "services",
    "payments",
    "refunds",
    "provider_statistics",
    "client_statistics",
];

/// Create a PostgreSQL connection pool
///
/// # Example
///
/// ```no_run
/// use booking_core::AppConfig;
/// use booking_db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = AppConfig::load()?;
///     let pool = create_pool(&config.database).await?;
///     Ok(())
/// }
/// ```
pub async fn create_pool(config: &DatabaseConfig) -> BookingResult<PgPool> {
    info!("Creating database connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .test_before_acquire(true)
        .connect(&config.url)
        .await
        .map_err(|e| {
            warn!("Failed to create database pool: {}", e);
            BookingError::Pool(format!("Failed to connect to database: {}", e))
        })?;

    info!(
        "Database pool created successfully with {} max connections",
        config.max_connections
    );

    // Test the connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| BookingError::Database(format!("Database health check failed: {}", e)))?;

    info!("Database connection verified");

    Ok(pool)
}

/// Apply pending migrations
pub async fn run_migrations(pool: &PgPool) -> BookingResult<()> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| BookingError::Database(format!("Migration failed: {}", e)))?;

    info!("Database migrations applied");
    Ok(())
}

/// Check that every table the engine needs exists
pub async fn verify_schema(pool: &PgPool) -> BookingResult<()> {
    let present: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_schema = current_schema()
            AND table_name::text = ANY($1)
        "#,
    )
    .bind(REQUIRED_TABLES)
    .fetch_all(pool)
    .await
    .map_err(|e| BookingError::Database(format!("Schema check failed: {}", e)))?;

    let missing = missing_tables(present.into_iter().map(|(name,)| name));
    if !missing.is_empty() {
        warn!("Missing tables: {:?}", missing);
        return Err(BookingError::Database(format!(
            "Missing tables: {}",
            missing.join(", ")
        )));
    }

    info!("Database schema verified");
    Ok(())
}

fn missing_tables(present: impl IntoIterator<Item = String>) -> Vec<&'static str> {
    let present: Vec<String> = present.into_iter().collect();
    REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|table| !present.iter().any(|p| p == table))
        .collect()
}
