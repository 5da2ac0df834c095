//! Booking type classification
//!
//! Each booking type carries its own scheduling and money rules. The rules are
//! exposed through [`BookingCapabilities`] so callers never branch on strings.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fields that a booking type requires on the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    ClientAddress,
    ClientPhone,
    ProviderAddress,
    Platform,
    BundleItems,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredField::ClientAddress => write!(f, "client_address"),
            RequiredField::ClientPhone => write!(f, "client_phone"),
            RequiredField::ProviderAddress => write!(f, "provider_address"),
            RequiredField::Platform => write!(f, "platform"),
            RequiredField::BundleItems => write!(f, "bundle_items"),
        }
    }
}

/// Capability interface implemented by every booking type variant
pub trait BookingCapabilities {
    /// Minimum hours between "now" and the booking start
    fn min_advance_hours(&self) -> i64;

    /// Maximum booking length in hours
    fn max_duration_hours(&self) -> i64;

    /// Base cancellation fee percent (0-100)
    fn cancellation_fee_percent(&self) -> Decimal;

    /// Whether a delivery (travel) fee is charged
    fn has_delivery_fee(&self) -> bool;

    /// Whether a deposit is collected at booking time
    fn supports_prepayment(&self) -> bool;

    /// Whether the provider must prepare equipment before the session
    fn requires_equipment_confirmation(&self) -> bool;

    /// Request fields that must be present for this type
    fn required_fields(&self) -> &'static [RequiredField];

    /// Step between candidate starts in availability searches
    fn slot_interval_minutes(&self) -> i64;
}

/// Booking type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingType {
    /// Provider travels to the client
    OnSite,
    /// Client visits the provider
    #[default]
    AtProviderLocation,
    /// Online session
    Remote,
    /// Several services booked as one package
    Bundle,
}

impl fmt::Display for BookingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingType::OnSite => write!(f, "on_site"),
            BookingType::AtProviderLocation => write!(f, "at_provider_location"),
            BookingType::Remote => write!(f, "remote"),
            BookingType::Bundle => write!(f, "bundle"),
        }
    }
}

impl BookingType {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "on_site" => Some(BookingType::OnSite),
            "at_provider_location" => Some(BookingType::AtProviderLocation),
            "remote" => Some(BookingType::Remote),
            "bundle" => Some(BookingType::Bundle),
            _ => None,
        }
    }
}

impl BookingCapabilities for BookingType {
    fn min_advance_hours(&self) -> i64 {
        match self {
            BookingType::OnSite => 2,
            BookingType::AtProviderLocation => 1,
            BookingType::Remote => 1,
            BookingType::Bundle => 24,
        }
    }

    fn max_duration_hours(&self) -> i64 {
        match self {
            BookingType::OnSite => 8,
            BookingType::AtProviderLocation => 8,
            BookingType::Remote => 4,
            BookingType::Bundle => 12,
        }
    }

    fn cancellation_fee_percent(&self) -> Decimal {
        match self {
            BookingType::OnSite => dec!(20),
            BookingType::AtProviderLocation => dec!(10),
            BookingType::Remote => dec!(10),
            BookingType::Bundle => dec!(30),
        }
    }

    fn has_delivery_fee(&self) -> bool {
        matches!(self, BookingType::OnSite)
    }

    fn supports_prepayment(&self) -> bool {
        matches!(self, BookingType::OnSite | BookingType::Bundle)
    }

    fn requires_equipment_confirmation(&self) -> bool {
        matches!(self, BookingType::OnSite | BookingType::Bundle)
    }

    fn required_fields(&self) -> &'static [RequiredField] {
        match self {
            BookingType::OnSite => &[RequiredField::ClientAddress, RequiredField::ClientPhone],
            BookingType::AtProviderLocation => &[RequiredField::ProviderAddress],
            BookingType::Remote => &[RequiredField::Platform],
            BookingType::Bundle => &[RequiredField::BundleItems],
        }
    }

    fn slot_interval_minutes(&self) -> i64 {
        match self {
            BookingType::Remote => 15,
            BookingType::Bundle => 60,
            BookingType::OnSite | BookingType::AtProviderLocation => 30,
        }
    }
}
