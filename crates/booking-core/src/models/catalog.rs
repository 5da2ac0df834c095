//! Catalog read model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bookable service as published by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    /// Default length, used for bundle line offsets
    pub duration_minutes: Option<i32>,
}
