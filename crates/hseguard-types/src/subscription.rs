//! Subscription types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ParseError, PaymentId, PlanId, SubscriptionId, TenantId};

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In trial period
    Trial,
    /// Paid and current
    Active,
    /// Access withheld, may be reactivated until the grace period ends
    Suspended,
    /// Cancelled by the tenant or an operator
    Cancelled,
    /// Lapsed without renewal
    Expired,
}

impl SubscriptionStatus {
    /// Stored representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Terminal states never transition again
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// States that grant access to plan features
    pub const fn is_entitled(&self) -> bool {
        matches!(self, Self::Trial | Self::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(ParseError::unknown("subscription status", s)),
        }
    }
}

/// Lifecycle operation, used to name illegal (state, operation) pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionOperation {
    /// Trial or suspended to active with a payment
    Activate,
    /// Extend an active subscription by one cycle
    Renew,
    /// Move an active subscription to another plan
    ChangePlan,
    /// Withhold access pending payment
    Suspend,
    /// Terminate at the tenant's request
    Cancel,
    /// Lapse, applied by the sweeper only
    Expire,
    /// Toggle automatic renewal
    SetAutoRenew,
}

impl SubscriptionOperation {
    /// Label used in logs, metrics and error messages
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Renew => "renew",
            Self::ChangePlan => "change_plan",
            Self::Suspend => "suspend",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
            Self::SetAutoRenew => "set_auto_renew",
        }
    }
}

impl std::fmt::Display for SubscriptionOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionOperation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activate" => Ok(Self::Activate),
            "renew" => Ok(Self::Renew),
            "change_plan" => Ok(Self::ChangePlan),
            "suspend" => Ok(Self::Suspend),
            "cancel" => Ok(Self::Cancel),
            "expire" => Ok(Self::Expire),
            "set_auto_renew" => Ok(Self::SetAutoRenew),
            _ => Err(ParseError::unknown("subscription operation", s)),
        }
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting settlement
    Pending,
    /// Settled
    Completed,
    /// Declined or errored
    Failed,
    /// Returned to the payer
    Refunded,
}

impl PaymentStatus {
    /// Stored representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(ParseError::unknown("payment status", s)),
        }
    }
}

/// Billing event recorded against a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID
    pub id: PaymentId,
    /// Subscription paid for
    pub subscription_id: SubscriptionId,
    /// Amount in minor currency units
    pub amount_minor: i64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Payment status
    pub status: PaymentStatus,
    /// Provider transaction reference
    pub transaction_id: String,
    /// When the payment was taken
    pub paid_at: DateTime<Utc>,
}

/// Append-only audit entry for one status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionHistoryEntry {
    /// Subscription the entry belongs to
    pub subscription_id: SubscriptionId,
    /// Status before the transition (`None` on creation)
    pub old_status: Option<SubscriptionStatus>,
    /// Status after the transition
    pub new_status: SubscriptionStatus,
    /// Operation that produced the entry
    pub operation: Option<SubscriptionOperation>,
    /// Free-text reason
    pub reason: String,
    /// User or system component that triggered it
    pub actor: String,
    /// When it happened
    pub occurred_at: DateTime<Utc>,
}

/// Read-side projection of a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSummary {
    /// Subscription ID
    pub id: SubscriptionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Current plan
    pub plan_id: PlanId,
    /// Current plan name
    pub plan_name: String,
    /// Status
    pub status: SubscriptionStatus,
    /// Period start
    pub start_date: DateTime<Utc>,
    /// Period end
    pub end_date: DateTime<Utc>,
    /// Next charge date
    pub next_billing_date: Option<DateTime<Utc>>,
    /// Whether the subscription renews automatically
    pub auto_renew: bool,
    /// End of the reactivation window while suspended
    pub grace_period_end: Option<DateTime<Utc>>,
    /// Whole days until `end_date` (negative once past)
    pub days_remaining: i64,
    /// Share of the subscribed period spent un-suspended, 0..=100
    pub compliance_percentage: f64,
}
