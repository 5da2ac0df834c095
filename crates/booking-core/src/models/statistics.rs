//! Rolling provider and client statistics

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::round_money;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatistics {
    pub provider_id: Uuid,
    pub completed_bookings: i64,
    pub total_earned: Decimal,
    pub average_rating: Decimal,
    pub rating_count: i64,
    pub bonus_earned: Decimal,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl ProviderStatistics {
    pub fn empty(provider_id: Uuid) -> Self {
        Self {
            provider_id,
            completed_bookings: 0,
            total_earned: Decimal::ZERO,
            average_rating: Decimal::ZERO,
            rating_count: 0,
            bonus_earned: Decimal::ZERO,
            last_completed_at: None,
        }
    }

    /// Fold one completed booking into the statistics
    pub fn record_completion(
        &mut self,
        net_earnings: Decimal,
        quality_bonus: Decimal,
        quality: Option<i16>,
        at: DateTime<Utc>,
    ) {
        self.completed_bookings += 1;
        self.total_earned += net_earnings;
        self.bonus_earned += quality_bonus;
        self.last_completed_at = Some(at);

        if let Some(q) = quality {
            self.average_rating =
                incremental_mean(self.average_rating, self.rating_count, Decimal::from(q));
            self.rating_count += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStatistics {
    pub client_id: Uuid,
    pub completed_bookings: i64,
    pub total_spent: Decimal,
    pub loyalty_points: i64,
    pub bonus_balance: Decimal,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl ClientStatistics {
    pub fn empty(client_id: Uuid) -> Self {
        Self {
            client_id,
            completed_bookings: 0,
            total_spent: Decimal::ZERO,
            loyalty_points: 0,
            bonus_balance: Decimal::ZERO,
            last_completed_at: None,
        }
    }

    pub fn record_completion(
        &mut self,
        spent: Decimal,
        cashback: Decimal,
        loyalty_points: i64,
        at: DateTime<Utc>,
    ) {
        self.completed_bookings += 1;
        self.total_spent += spent;
        self.bonus_balance += cashback;
        self.loyalty_points += loyalty_points;
        self.last_completed_at = Some(at);
    }
}

/// `(old_avg * old_count + value) / (old_count + 1)`, rounded to 2 dp
pub fn incremental_mean(old_avg: Decimal, old_count: i64, value: Decimal) -> Decimal {
    let count = Decimal::from(old_count);
    round_money((old_avg * count + value) / (count + Decimal::ONE))
}
