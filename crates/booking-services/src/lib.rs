//! Business logic services for the booking engine
//!
//! This crate contains the services that drive a booking from request to
//! completion or cancellation: pricing, cancellation fees, refunds, booking
//! numbers and the lifecycle state machine itself.
//!
//! # Architecture
//!
//! Services depend only on the ports in `booking_core::traits`:
//! - Repositories, the payment gateway and the notifier are injected as `Arc<dyn Trait>`
//! - Rule constants come from immutable config structs
//! - All operations are instrumented with tracing
//! - Errors are `BookingError` values, never panics
//!
//! # Services
//!
//! - `BookingLifecycle` - Request, confirm, start, cancel, complete, reschedule, calendar blocks
//! - `AvailabilityFinder` - Free windows from working hours and active slots
//! - `PricingCalculator` - Service price, discounts, delivery fee and deposit
//! - `CancellationPolicy` - Cancellation fee by notice and side
//! - `RefundOrchestrator` - Cancellation refunds and standalone refund requests
//! - `BookingNumberGenerator` - Unique `BK<date>-<suffix>` numbers
//! - `TracingNotifier` - Default notification adapter

pub mod availability;
pub mod cancellation_policy;
pub mod clock;
pub mod lifecycle;
pub mod notifications;
pub mod numbering;
pub mod pricing;
pub mod refund;

pub use availability::{AvailabilityFinder, AvailabilityQuery, AvailableSlot, DayAvailability};
pub use cancellation_policy::{CancellationPolicy, FeeResult};
pub use clock::{ManualClock, SystemClock};
pub use lifecycle::{
    BookingLifecycle, BookingRequest, BulkCancelItem, BulkCancelReport, BundleItem,
    CancellationResult, LifecyclePorts, LifecycleSettings,
};
pub use notifications::TracingNotifier;
pub use numbering::BookingNumberGenerator;
pub use pricing::{PricingCalculator, PricingContext, PricingResult};
pub use refund::{RefundOrchestrator, RefundReceipt, RefundRequest, RefundValidator};

/// Business logic constants
pub mod constants {
    /// Prefix of every booking number
    pub const BOOKING_NUMBER_PREFIX: &str = "BK";

    /// Length of the random booking number suffix
    pub const BOOKING_NUMBER_SUFFIX_LEN: usize = 6;

    /// Characters used in booking number suffixes
    pub const BOOKING_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
}
