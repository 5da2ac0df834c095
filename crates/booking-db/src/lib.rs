//! Booking Engine Database Layer
//!
//! This crate provides storage adapters for the booking engine ports:
//!
//! - Connection pool management, migrations and schema checks with sqlx
//! - PostgreSQL repositories with provider-scoped locking for slot inserts
//! - An in-memory store implementing every repository port, used by tests
//!   and embedded deployments

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::InMemoryStore;
pub use pool::{create_pool, run_migrations, verify_schema};
pub use repositories::*;

// Re-export commonly used types
pub use booking_core::{BookingError, BookingResult};
pub use sqlx::{PgPool, Postgres, Transaction};
