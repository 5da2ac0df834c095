//! Repository implementations
//!
//! This module contains PostgreSQL implementations of the repository ports
//! defined in booking-core, using sqlx.

pub mod booking_repo;
pub mod catalog_repo;
pub mod payment_repo;
pub mod slot_repo;
pub mod statistics_repo;

pub use booking_repo::PgBookingRepository;
pub use catalog_repo::PgCatalogRepository;
pub use payment_repo::PgPaymentRepository;
pub use slot_repo::PgSlotRepository;
pub use statistics_repo::PgStatisticsRepository;
