//! Booking Engine
//!
//! Deploy-time command: loads configuration, applies migrations, verifies
//! the schema and wires the booking lifecycle against PostgreSQL once to
//! confirm the stores fit together, then exits. Applications embed
//! `BookingLifecycle` through `booking-services` and build it the same way.

use async_trait::async_trait;
use booking_core::config::{AppConfig, LoggingConfig};
use booking_core::models::GatewayRefund;
use booking_core::traits::PaymentGateway;
use booking_core::{BookingError, BookingResult};
use booking_db::{
    create_pool, run_migrations, verify_schema, PgBookingRepository, PgCatalogRepository,
    PgPaymentRepository, PgSlotRepository, PgStatisticsRepository,
};
use booking_services::{
    BookingLifecycle, LifecyclePorts, LifecycleSettings, SystemClock, TracingNotifier,
};
use rust_decimal::Decimal;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Gateway used when no payment provider is attached.
///
/// Every call fails, so cancellation refunds are recorded as manual and
/// settlements as failed for later reconciliation.
struct DetachedGateway;

#[async_trait]
impl PaymentGateway for DetachedGateway {
    async fn refund(
        &self,
        payment_reference: &str,
        amount: Decimal,
    ) -> BookingResult<GatewayRefund> {
        warn!(
            "No payment gateway attached, refund {} of {} left for manual handling",
            amount, payment_reference
        );
        Err(BookingError::Gateway("payment gateway not attached".to_string()))
    }

    async fn capture_payment(&self, booking_reference: &str) -> BookingResult<()> {
        warn!(
            "No payment gateway attached, capture for {} skipped",
            booking_reference
        );
        Err(BookingError::Gateway("payment gateway not attached".to_string()))
    }

    async fn transfer_to_provider(
        &self,
        booking_reference: &str,
        net_amount: Decimal,
    ) -> BookingResult<()> {
        warn!(
            "No payment gateway attached, payout {} for {} skipped",
            net_amount, booking_reference
        );
        Err(BookingError::Gateway("payment gateway not attached".to_string()))
    }
}

/// Initialize tracing/logging
fn init_tracing(logging: &LoggingConfig) {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| logging.level.clone());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "booking_engine={},booking_services={},booking_db={},booking_core={},sqlx=warn",
            log_level, log_level, log_level, log_level
        ))
    });

    let fmt_layer = if logging.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn build_lifecycle(pool: &sqlx::PgPool, config: &AppConfig) -> BookingLifecycle {
    let ports = LifecyclePorts {
        clock: Arc::new(SystemClock),
        catalog: Arc::new(PgCatalogRepository::new(pool.clone())),
        slots: Arc::new(PgSlotRepository::new(pool.clone())),
        bookings: Arc::new(PgBookingRepository::new(pool.clone())),
        statistics: Arc::new(PgStatisticsRepository::new(pool.clone())),
        payments: Arc::new(PgPaymentRepository::new(pool.clone())),
        gateway: Arc::new(DetachedGateway),
        notifier: Arc::new(TracingNotifier),
    };

    BookingLifecycle::new(ports, LifecycleSettings::from(config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    init_tracing(&config.logging);

    info!("Starting Booking Engine v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Scheduling in {} with {} min preparation window",
        config.scheduling.timezone, config.scheduling.preparation_minutes
    );

    info!("Connecting to database...");
    let pool = create_pool(&config.database).await?;

    if config.database.run_migrations {
        run_migrations(&pool).await?;
    }
    verify_schema(&pool).await?;

    let _lifecycle = build_lifecycle(&pool, &config);
    info!(
        "Booking lifecycle wired (reschedule limit {}/{}, availability {} days)",
        config.scheduling.client_reschedule_limit,
        config.scheduling.staff_reschedule_limit,
        config.scheduling.availability_days
    );

    pool.close().await;
    info!("Database ready");

    Ok(())
}
