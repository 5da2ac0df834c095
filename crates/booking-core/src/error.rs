//! Unified error handling for the booking engine
//!
//! Every failure the engine can report is a variant of [`BookingError`]. The
//! variants carry the values that triggered them (thresholds, conflicting
//! windows) so callers can build precise user-facing messages.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BookingStatus, BookingType, ConflictingBooking, RequiredField};

/// Coarse error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ScheduleViolation,
    Authorization,
    State,
    PolicyViolation,
    ExternalSystem,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ScheduleViolation => "schedule_violation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::State => "state",
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::ExternalSystem => "external_system",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Main engine error type
#[derive(Error, Debug)]
pub enum BookingError {
    // ==================== Validation Errors ====================
    #[error("Client not found: {0}")]
    ClientNotFound(Uuid),

    #[error("Provider not found: {0}")]
    ProviderNotFound(Uuid),

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("Booking cannot start in the past: {start}")]
    StartInPast { start: DateTime<Utc> },

    #[error("{booking_type} bookings require at least {minimum_hours} hours notice (earliest start {earliest_start})")]
    InsufficientNotice {
        booking_type: BookingType,
        minimum_hours: i64,
        earliest_start: DateTime<Utc>,
    },

    #[error("Invalid duration: {0} minutes")]
    InvalidDuration(i32),

    #[error("{booking_type} bookings last at most {max_hours} hours, requested {requested_minutes} minutes")]
    DurationExceeded {
        booking_type: BookingType,
        max_hours: i64,
        requested_minutes: i32,
    },

    #[error("Missing required field for {booking_type}: {field}")]
    MissingField {
        booking_type: BookingType,
        field: RequiredField,
    },

    #[error("Service quality must be between 1 and 5, got {0}")]
    InvalidQuality(i16),

    #[error("Bookings can be moved at most {max_days} days ahead")]
    RescheduleTooFarAhead { max_days: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    // ==================== Resource Errors ====================
    #[error("Booking not found: {0}")]
    BookingNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Slot not found: {0}")]
    SlotNotFound(Uuid),

    // ==================== Conflict Errors ====================
    #[error("Time is taken by booking #{} ({start} - {end})", .booking_number.as_deref().unwrap_or("blocked"))]
    SlotConflict {
        booking_number: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Could not allocate a unique booking number after {0} attempts")]
    BookingNumberExhausted(u32),

    // ==================== Schedule Errors ====================
    #[error("Provider does not work on {0}")]
    NonWorkingDay(Weekday),

    #[error("Booking falls outside working hours ({work_start} - {work_end})")]
    OutsideWorkingHours {
        work_start: NaiveTime,
        work_end: NaiveTime,
    },

    #[error("Booking overlaps the provider break ({break_start} - {break_end})")]
    DuringBreak {
        break_start: NaiveTime,
        break_end: NaiveTime,
    },

    // ==================== Authorization Errors ====================
    #[error("User {actor_id} may not {operation} booking {booking_number}")]
    Forbidden {
        actor_id: Uuid,
        booking_number: String,
        operation: &'static str,
    },

    #[error("User {actor_id} may not manage the calendar of provider {provider_id}")]
    CalendarForbidden { actor_id: Uuid, provider_id: Uuid },

    // ==================== State Errors ====================
    #[error("Cannot {operation} booking in status {status}")]
    InvalidTransition {
        status: BookingStatus,
        operation: &'static str,
    },

    #[error("Booking cannot be completed more than {minutes} minutes before it starts")]
    CompletionTooEarly { minutes: i64 },

    // ==================== Policy Errors ====================
    #[error("Cancellation must happen at least {minimum_hours} hours before the start")]
    CancellationWindowClosed { minimum_hours: i64 },

    #[error("Rescheduling must happen at least {minimum_hours} hours before the start")]
    RescheduleWindowClosed { minimum_hours: i64 },

    #[error("Booking was already moved {limit} times")]
    RescheduleLimitReached { limit: i32 },

    #[error("Payment is not refundable: {0}")]
    NotRefundable(String),

    #[error("Refund amount {requested} exceeds refundable amount {remaining}")]
    RefundExceedsRemaining {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Refund deadline passed at {deadline}")]
    RefundDeadlinePassed { deadline: DateTime<Utc> },

    #[error("Cannot refund a service payment for a booking in status {0}")]
    RefundBlockedByStatus(BookingStatus),

    #[error("Cannot refund a deposit after the booking started")]
    DepositRefundAfterStart,

    #[error("Daily refund limit reached: max {limit} refunds per day")]
    DailyRefundLimit { limit: u32 },

    #[error("Monthly refund ceiling exceeded: {ceiling}")]
    MonthlyRefundCeiling { ceiling: Decimal },

    // ==================== External System Errors ====================
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Notification error: {0}")]
    Notification(String),

    // ==================== Internal Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Returns the category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::ClientNotFound(_)
            | BookingError::ProviderNotFound(_)
            | BookingError::ServiceNotFound(_)
            | BookingError::StartInPast { .. }
            | BookingError::InsufficientNotice { .. }
            | BookingError::InvalidDuration(_)
            | BookingError::DurationExceeded { .. }
            | BookingError::MissingField { .. }
            | BookingError::InvalidQuality(_)
            | BookingError::RescheduleTooFarAhead { .. }
            | BookingError::Validation(_) => ErrorKind::Validation,

            BookingError::BookingNotFound(_)
            | BookingError::PaymentNotFound(_)
            | BookingError::SlotNotFound(_) => ErrorKind::NotFound,

            BookingError::SlotConflict { .. } => ErrorKind::Conflict,

            BookingError::NonWorkingDay(_)
            | BookingError::OutsideWorkingHours { .. }
            | BookingError::DuringBreak { .. } => ErrorKind::ScheduleViolation,

            BookingError::Forbidden { .. } | BookingError::CalendarForbidden { .. } => {
                ErrorKind::Authorization
            }

            BookingError::InvalidTransition { .. } | BookingError::CompletionTooEarly { .. } => {
                ErrorKind::State
            }

            BookingError::CancellationWindowClosed { .. }
            | BookingError::RescheduleWindowClosed { .. }
            | BookingError::RescheduleLimitReached { .. }
            | BookingError::NotRefundable(_)
            | BookingError::RefundExceedsRemaining { .. }
            | BookingError::RefundDeadlinePassed { .. }
            | BookingError::RefundBlockedByStatus(_)
            | BookingError::DepositRefundAfterStart
            | BookingError::DailyRefundLimit { .. }
            | BookingError::MonthlyRefundCeiling { .. } => ErrorKind::PolicyViolation,

            BookingError::Gateway(_) | BookingError::Notification(_) => ErrorKind::ExternalSystem,

            BookingError::BookingNumberExhausted(_)
            | BookingError::Database(_)
            | BookingError::Pool(_)
            | BookingError::Transaction(_)
            | BookingError::Config(_)
            | BookingError::Serialization(_)
            | BookingError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the stable error code for API consumers
    pub fn error_code(&self) -> &'static str {
        match self {
            BookingError::ClientNotFound(_) => "client_not_found",
            BookingError::ProviderNotFound(_) => "provider_not_found",
            BookingError::ServiceNotFound(_) => "service_not_found",
            BookingError::StartInPast { .. } => "start_in_past",
            BookingError::InsufficientNotice { .. } => "insufficient_notice",
            BookingError::InvalidDuration(_) => "invalid_duration",
            BookingError::DurationExceeded { .. } => "duration_exceeded",
            BookingError::MissingField { .. } => "missing_field",
            BookingError::InvalidQuality(_) => "invalid_quality",
            BookingError::RescheduleTooFarAhead { .. } => "reschedule_too_far_ahead",
            BookingError::Validation(_) => "validation_error",
            BookingError::BookingNotFound(_) => "booking_not_found",
            BookingError::PaymentNotFound(_) => "payment_not_found",
            BookingError::SlotNotFound(_) => "slot_not_found",
            BookingError::SlotConflict { .. } => "slot_conflict",
            BookingError::BookingNumberExhausted(_) => "booking_number_exhausted",
            BookingError::NonWorkingDay(_) => "non_working_day",
            BookingError::OutsideWorkingHours { .. } => "outside_working_hours",
            BookingError::DuringBreak { .. } => "during_break",
            BookingError::Forbidden { .. } => "forbidden",
            BookingError::CalendarForbidden { .. } => "calendar_forbidden",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::CompletionTooEarly { .. } => "completion_too_early",
            BookingError::CancellationWindowClosed { .. } => "cancellation_window_closed",
            BookingError::RescheduleWindowClosed { .. } => "reschedule_window_closed",
            BookingError::RescheduleLimitReached { .. } => "reschedule_limit_reached",
            BookingError::NotRefundable(_) => "not_refundable",
            BookingError::RefundExceedsRemaining { .. } => "refund_exceeds_remaining",
            BookingError::RefundDeadlinePassed { .. } => "refund_deadline_passed",
            BookingError::RefundBlockedByStatus(_) => "refund_blocked_by_status",
            BookingError::DepositRefundAfterStart => "deposit_refund_after_start",
            BookingError::DailyRefundLimit { .. } => "daily_refund_limit",
            BookingError::MonthlyRefundCeiling { .. } => "monthly_refund_ceiling",
            BookingError::Gateway(_) => "gateway_error",
            BookingError::Notification(_) => "notification_error",
            BookingError::Database(_) => "database_error",
            BookingError::Pool(_) => "pool_error",
            BookingError::Transaction(_) => "transaction_error",
            BookingError::Config(_) => "config_error",
            BookingError::Serialization(_) => "serialization_error",
            BookingError::Internal(_) => "internal_error",
        }
    }
}

// ==================== From implementations ====================

impl From<ConflictingBooking> for BookingError {
    fn from(conflict: ConflictingBooking) -> Self {
        BookingError::SlotConflict {
            booking_number: conflict.booking_number,
            start: conflict.start_time,
            end: conflict.end_time,
        }
    }
}

impl From<serde_json::Error> for BookingError {
    fn from(err: serde_json::Error) -> Self {
        BookingError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for BookingError {
    fn from(err: config::ConfigError) -> Self {
        BookingError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(err: validator::ValidationErrors) -> Self {
        BookingError::Validation(err.to_string())
    }
}
