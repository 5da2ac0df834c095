//! Acting users
//!
//! Identity lives outside the engine; callers pass the already-authenticated
//! user id together with its platform role.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Platform role of the acting user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Regular client or provider
    #[default]
    Member,
    Moderator,
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Member => write!(f, "member"),
            UserRole::Moderator => write!(f, "moderator"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl UserRole {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "member" => Some(UserRole::Member),
            "moderator" => Some(UserRole::Moderator),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    /// May act on bookings they are not a party to
    pub fn is_privileged(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Moderator)
    }
}

/// The user performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl Actor {
    pub fn member(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: UserRole::Member,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: UserRole::Admin,
        }
    }
}

/// Which side of the booking a cancellation is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationSide {
    Client,
    /// The provider, or staff acting on the provider's behalf
    Provider,
}

impl fmt::Display for CancellationSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationSide::Client => write!(f, "client"),
            CancellationSide::Provider => write!(f, "provider"),
        }
    }
}
