//! Booking Engine Core Library
//!
//! This crate provides the foundational types, ports, and error handling
//! for the booking engine. It includes:
//!
//! - Domain models (Booking, TimeSlot, WorkingSchedule, payments, statistics)
//! - Ports for repositories, the payment gateway and notifications
//! - Unified error handling with stable error codes
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::{BookingError, ErrorKind};

/// Result type alias using BookingError
pub type BookingResult<T> = Result<T, BookingError>;
