//! Application configuration
//!
//! Configuration is loaded with the `config` crate from built-in defaults,
//! optional `config/default` and `config/{RUN_MODE}` files, and `BOOKING__`
//! prefixed environment variables. Each policy section has a `Default` that
//! matches the production rules, so tests can build services without files.

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub cancellation: CancellationConfig,

    #[serde(default)]
    pub refund: RefundConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply pending migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Calendar rules
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Timezone in which working schedules and weekdays are interpreted
    pub timezone: Tz,

    /// Length of the preparation slot before equipment-bound bookings
    pub preparation_minutes: i64,

    /// Bundle item length when the catalog has none
    pub default_item_minutes: i32,

    /// Attempts at drawing an unused booking number
    pub booking_number_attempts: u32,

    /// Furthest a booking may be moved, in days from now
    pub max_reschedule_days: i64,

    /// Moves allowed when the client reschedules
    pub client_reschedule_limit: i32,

    /// Moves allowed when the provider or staff reschedules
    pub staff_reschedule_limit: i32,

    /// Days covered by availability searches
    pub availability_days: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            preparation_minutes: 15,
            default_item_minutes: 60,
            booking_number_attempts: 10,
            max_reschedule_days: 90,
            client_reschedule_limit: 2,
            staff_reschedule_limit: 5,
            availability_days: 14,
        }
    }
}

/// Price and discount rules. Percentages are 0-100.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PricingConfig {
    pub first_booking_discount_percent: Decimal,
    /// Flat discount for bookings at the provider's place
    pub at_provider_location_discount: Decimal,
    pub remote_discount_percent: Decimal,
    pub bundle_discount_percent: Decimal,
    /// Applied to bookings starting Monday to Friday
    pub weekday_discount_percent: Decimal,
    /// Ceiling on the summed discount, as a share of the service price
    pub max_discount_percent: Decimal,
    pub default_delivery_fee: Decimal,
    pub deposit_percent: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            first_booking_discount_percent: dec!(10),
            at_provider_location_discount: dec!(200),
            remote_discount_percent: dec!(5),
            bundle_discount_percent: dec!(15),
            weekday_discount_percent: dec!(5),
            max_discount_percent: dec!(40),
            default_delivery_fee: dec!(500),
            deposit_percent: dec!(30),
        }
    }
}

/// Cancellation fee rules
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CancellationConfig {
    /// No fee when cancelling at least this long before start
    pub free_cancellation_hours: i64,
    /// Cancelling closer than this doubles the fee
    pub late_cancellation_hours: i64,
    pub late_multiplier: Decimal,
    pub provider_multiplier: Decimal,
    /// Minimum notice for provider-side cancellation without force
    pub provider_min_notice_hours: i64,
    /// Fees above this raise a staff alert
    pub high_fee_alert_threshold: Decimal,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            free_cancellation_hours: 24,
            late_cancellation_hours: 4,
            late_multiplier: dec!(2),
            provider_multiplier: dec!(1.5),
            provider_min_notice_hours: 1,
            high_fee_alert_threshold: dec!(1000),
        }
    }
}

/// Standalone refund limits
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RefundConfig {
    pub min_amount: Decimal,
    pub service_payment_days: i64,
    pub deposit_days: i64,
    pub subscription_days: i64,
    pub daily_limit: u32,
    pub monthly_ceiling: Decimal,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            min_amount: dec!(0.01),
            service_payment_days: 14,
            deposit_days: 7,
            subscription_days: 30,
            daily_limit: 5,
            monthly_ceiling: dec!(500000),
        }
    }
}

/// Completion bonuses, commission and review window
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Platform share of the booking total
    pub commission_percent: Decimal,
    pub client_cashback_percent: Decimal,
    /// Points per currency unit of the total
    pub loyalty_points_rate: Decimal,
    /// Provider bonus on net earnings for quality 5
    pub excellent_quality_bonus_percent: Decimal,
    /// Provider bonus on net earnings for quality 4
    pub good_quality_bonus_percent: Decimal,
    pub review_window_days: i64,
    /// How early before start a booking may be completed
    pub early_completion_minutes: i64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            commission_percent: dec!(10),
            client_cashback_percent: dec!(2),
            loyalty_points_rate: dec!(0.1),
            excellent_quality_bonus_percent: dec!(5),
            good_quality_bonus_percent: dec!(2),
            review_window_days: 30,
            early_completion_minutes: 15,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config files
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 2)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("scheduling.timezone", "UTC")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with BOOKING__ prefix
            .add_source(
                Environment::with_prefix("BOOKING")
                    .separator("__")
                    .try_parsing(true),
            )
            // Plain DATABASE_URL takes precedence
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("BOOKING").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_policies() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.max_discount_percent, dec!(40));
        assert_eq!(pricing.default_delivery_fee, dec!(500));

        let cancellation = CancellationConfig::default();
        assert_eq!(cancellation.free_cancellation_hours, 24);
        assert_eq!(cancellation.provider_multiplier, dec!(1.5));

        let refund = RefundConfig::default();
        assert_eq!(refund.daily_limit, 5);
        assert_eq!(refund.monthly_ceiling, dec!(500000));
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let toml = r#"
            [database]
            url = "postgresql://localhost/bookings"

            [scheduling]
            timezone = "Europe/Moscow"

            [pricing]
            deposit_percent = 25
        "#;

        let config: AppConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.scheduling.timezone, chrono_tz::Europe::Moscow);
        assert_eq!(config.scheduling.preparation_minutes, 15);
        assert_eq!(config.scheduling.client_reschedule_limit, 2);
        assert_eq!(config.scheduling.availability_days, 14);
        assert_eq!(config.pricing.deposit_percent, dec!(25));
        assert_eq!(config.pricing.bundle_discount_percent, dec!(15));
        assert_eq!(config.completion, CompletionConfig::default());
    }
}
