//! Domain events emitted by subscription transitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PaymentId, PlanId, SubscriptionId, TenantId};

/// Event emitted by a committed subscription transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A trial started, or a trial was converted into a paid subscription
    SubscriptionCreated {
        subscription_id: SubscriptionId,
        tenant_id: TenantId,
        plan_id: PlanId,
        trial: bool,
        occurred_at: DateTime<Utc>,
    },
    /// The paid period was extended
    SubscriptionRenewed {
        subscription_id: SubscriptionId,
        tenant_id: TenantId,
        new_end_date: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },
    /// A suspended subscription was paid for again
    SubscriptionReactivated {
        subscription_id: SubscriptionId,
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
    /// Access was withheld
    SubscriptionSuspended {
        subscription_id: SubscriptionId,
        tenant_id: TenantId,
        reason: String,
        grace_period_end: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },
    /// The tenant moved to another plan
    PlanChanged {
        subscription_id: SubscriptionId,
        tenant_id: TenantId,
        old_plan_id: PlanId,
        new_plan_id: PlanId,
        occurred_at: DateTime<Utc>,
    },
    /// Terminated on request
    SubscriptionCancelled {
        subscription_id: SubscriptionId,
        tenant_id: TenantId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    /// Lapsed without renewal
    SubscriptionExpired {
        subscription_id: SubscriptionId,
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
    /// A payment settled
    PaymentCompleted {
        payment_id: PaymentId,
        subscription_id: SubscriptionId,
        tenant_id: TenantId,
        amount_minor: i64,
        currency: String,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Event name used for routing and logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated { .. } => "subscription_created",
            Self::SubscriptionRenewed { .. } => "subscription_renewed",
            Self::SubscriptionReactivated { .. } => "subscription_reactivated",
            Self::SubscriptionSuspended { .. } => "subscription_suspended",
            Self::PlanChanged { .. } => "plan_changed",
            Self::SubscriptionCancelled { .. } => "subscription_cancelled",
            Self::SubscriptionExpired { .. } => "subscription_expired",
            Self::PaymentCompleted { .. } => "payment_completed",
        }
    }

    /// Tenant the event concerns
    pub fn tenant_id(&self) -> TenantId {
        match self {
            Self::SubscriptionCreated { tenant_id, .. }
            | Self::SubscriptionRenewed { tenant_id, .. }
            | Self::SubscriptionReactivated { tenant_id, .. }
            | Self::SubscriptionSuspended { tenant_id, .. }
            | Self::PlanChanged { tenant_id, .. }
            | Self::SubscriptionCancelled { tenant_id, .. }
            | Self::SubscriptionExpired { tenant_id, .. }
            | Self::PaymentCompleted { tenant_id, .. } => *tenant_id,
        }
    }
}
