//! Payment, refund and settlement models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What a payment was made for; drives the refund deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    #[default]
    ServicePayment,
    BookingDeposit,
    Subscription,
}

impl fmt::Display for PaymentPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentPurpose::ServicePayment => write!(f, "service_payment"),
            PaymentPurpose::BookingDeposit => write!(f, "booking_deposit"),
            PaymentPurpose::Subscription => write!(f, "subscription"),
        }
    }
}

impl PaymentPurpose {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "service_payment" => Some(PaymentPurpose::ServicePayment),
            "booking_deposit" => Some(PaymentPurpose::BookingDeposit),
            "subscription" => Some(PaymentPurpose::Subscription),
            _ => None,
        }
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    PartiallyRefunded,
    Refunded,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::PartiallyRefunded => write!(f, "partially_refunded"),
            PaymentStatus::Refunded => write!(f, "refunded"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl PaymentStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            "refunded" => Some(PaymentStatus::Refunded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    /// Statuses from which money can still be returned
    pub fn allows_refund(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::PartiallyRefunded)
    }
}

/// A completed (or pending) payment made by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub purpose: PaymentPurpose,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub refunded_amount: Decimal,
    pub gateway_reference: Option<String>,
    /// When the gateway confirmed the payment
    pub processed_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    /// Amount that can still be refunded
    #[inline]
    pub fn remaining_refundable(&self) -> Decimal {
        (self.amount - self.refunded_amount).max(Decimal::ZERO)
    }

    pub fn is_refundable(&self) -> bool {
        self.status.allows_refund() && self.remaining_refundable() > Decimal::ZERO
    }

    /// Add a refund to the running total and move the status accordingly
    pub fn apply_refund(&mut self, amount: Decimal) {
        self.refunded_amount += amount;
        self.status = if self.refunded_amount >= self.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
    }

    /// Take back a refund that was counted but never paid out
    pub fn revert_refund(&mut self, amount: Decimal) {
        self.refunded_amount = (self.refunded_amount - amount).max(Decimal::ZERO);
        self.status = if self.refunded_amount.is_zero() {
            PaymentStatus::Completed
        } else {
            PaymentStatus::PartiallyRefunded
        };
    }
}

/// Lifecycle of a refund row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Counted against the payment, gateway call in flight
    #[default]
    Pending,
    Completed,
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefundStatus::Pending => write!(f, "pending"),
            RefundStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Refunds already issued to a user, used for limit checks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefundActivity {
    pub refunds_today: u32,
    pub refunded_this_month: Decimal,
}

/// A refund to be held against its payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRefund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of the refund step of a cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefundOutcome {
    /// Nothing was paid
    NoPayment,
    /// The whole payment is retained as the cancellation fee
    NoRefund { fee: Decimal },
    /// The gateway accepted the refund
    AutomaticRefund {
        amount: Decimal,
        fee: Decimal,
        transaction_id: String,
    },
    /// Gateway refund failed; an operator must finish it
    ManualRefundRequired {
        amount: Decimal,
        fee: Decimal,
        error_detail: String,
    },
}

impl RefundOutcome {
    /// Amount returned (or owed) to the client
    pub fn refund_amount(&self) -> Decimal {
        match self {
            RefundOutcome::AutomaticRefund { amount, .. }
            | RefundOutcome::ManualRefundRequired { amount, .. } => *amount,
            RefundOutcome::NoPayment | RefundOutcome::NoRefund { .. } => Decimal::ZERO,
        }
    }

    pub fn requires_manual_action(&self) -> bool {
        matches!(self, RefundOutcome::ManualRefundRequired { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RefundOutcome::NoPayment => "no_payment",
            RefundOutcome::NoRefund { .. } => "no_refund",
            RefundOutcome::AutomaticRefund { .. } => "automatic_refund",
            RefundOutcome::ManualRefundRequired { .. } => "manual_refund_required",
        }
    }
}

/// Gateway answer to a refund request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub error: Option<String>,
}

/// Result of post-completion payment capture and provider payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub captured: bool,
    pub transferred: bool,
    pub provider_net_amount: Decimal,
    pub errors: Vec<String>,
}

impl SettlementOutcome {
    pub fn is_complete(&self) -> bool {
        self.captured && self.transferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment(amount: Decimal, refunded: Decimal, status: PaymentStatus) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            booking_id: None,
            purpose: PaymentPurpose::ServicePayment,
            status,
            amount,
            refunded_amount: refunded,
            gateway_reference: None,
            processed_at: None,
        }
    }

    #[test]
    fn test_remaining_refundable() {
        let p = payment(dec!(1000), dec!(250), PaymentStatus::PartiallyRefunded);
        assert_eq!(p.remaining_refundable(), dec!(750));
        assert!(p.is_refundable());

        let p = payment(dec!(1000), dec!(1000), PaymentStatus::PartiallyRefunded);
        assert!(!p.is_refundable());

        let p = payment(dec!(1000), dec!(0), PaymentStatus::Pending);
        assert!(!p.is_refundable());
    }

    #[test]
    fn test_apply_refund_moves_status() {
        let mut p = payment(dec!(1000), dec!(0), PaymentStatus::Completed);
        p.apply_refund(dec!(400));
        assert_eq!(p.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(p.remaining_refundable(), dec!(600));

        p.apply_refund(dec!(600));
        assert_eq!(p.status, PaymentStatus::Refunded);
        assert!(!p.is_refundable());
    }

    #[test]
    fn test_revert_refund_restores_status() {
        let mut p = payment(dec!(1000), dec!(0), PaymentStatus::Completed);
        p.apply_refund(dec!(300));
        p.apply_refund(dec!(200));

        p.revert_refund(dec!(200));
        assert_eq!(p.refunded_amount, dec!(300));
        assert_eq!(p.status, PaymentStatus::PartiallyRefunded);

        p.revert_refund(dec!(300));
        assert_eq!(p.refunded_amount, Decimal::ZERO);
        assert_eq!(p.status, PaymentStatus::Completed);
    }

    #[test]
    fn test_refund_outcome_serializes_with_tag() {
        let outcome = RefundOutcome::NoRefund { fee: dec!(400) };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "no_refund");
        assert_eq!(outcome.refund_amount(), Decimal::ZERO);
    }
}
