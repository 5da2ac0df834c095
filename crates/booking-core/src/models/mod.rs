//! Domain models for the booking engine
//!
//! This module contains the core domain models used throughout the workspace.

pub mod actor;
pub mod booking;
pub mod booking_type;
pub mod catalog;
pub mod events;
pub mod money;
pub mod payment;
pub mod slot;
pub mod statistics;
pub mod transition;

pub use actor::{Actor, CancellationSide, UserRole};
pub use booking::{
    Booking, BookingDetails, BookingServiceLine, BookingStatus, CompletionBonuses, NewBooking,
};
pub use booking_type::{BookingCapabilities, BookingType, RequiredField};
pub use catalog::ServiceOffering;
pub use events::BookingEvent;
pub use money::{percent_of, round_money};
pub use payment::{
    GatewayRefund, NewRefund, PaymentPurpose, PaymentRecord, PaymentStatus, RefundActivity,
    RefundOutcome, RefundStatus, SettlementOutcome,
};
pub use slot::{intervals_overlap, ConflictingBooking, SlotKind, TimeSlot, WorkingSchedule};
pub use statistics::{incremental_mean, ClientStatistics, ProviderStatistics};
pub use transition::{CancellationRecord, CompletionRecord, RescheduleRecord, StatusChange};
