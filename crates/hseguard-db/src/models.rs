//! Database row models
//!
//! These types map directly to database rows using SQLx's FromRow derive.
//! Enum columns are stored as text and parsed by the billing core.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Tenant row from the database
#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<String>,
}

/// Plan row from the database
#[derive(Debug, Clone, FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub name: String,
    pub plan_type: String,
    pub billing_cycle: String,
    pub price_minor: i64,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Plan feature row from the database
#[derive(Debug, Clone, FromRow)]
pub struct PlanFeatureRow {
    pub plan_id: Uuid,
    pub position: i32,
    pub code: String,
    pub display_name: String,
    pub kind: String,
    pub enabled: bool,
    pub usage_limit: Option<i64>,
    pub reset_period: String,
}

/// Plan together with its ordered features
#[derive(Debug, Clone)]
pub struct PlanRecord {
    pub plan: PlanRow,
    pub features: Vec<PlanFeatureRow>,
}

/// Subscription row from the database
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspended_seconds: i64,
    pub last_notified_threshold: Option<i32>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

/// Payment row from the database
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub transaction_id: String,
    pub paid_at: DateTime<Utc>,
}

/// Subscription history row from the database
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionHistoryRow {
    pub id: i64,
    pub subscription_id: Uuid,
    pub old_status: Option<String>,
    pub new_status: String,
    pub operation: Option<String>,
    pub reason: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

/// Feature usage row from the database
#[derive(Debug, Clone, FromRow)]
pub struct FeatureUsageRow {
    pub tenant_id: Uuid,
    pub feature_code: String,
    pub current_usage: i64,
    pub usage_limit: Option<i64>,
    pub reset_period: String,
    pub next_reset_date: Option<DateTime<Utc>>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl TenantRow {
    /// Convert to domain TenantId
    pub fn tenant_id(&self) -> hseguard_types::TenantId {
        hseguard_types::TenantId(self.id)
    }
}

impl SubscriptionRow {
    /// Convert to domain SubscriptionId
    pub fn subscription_id(&self) -> hseguard_types::SubscriptionId {
        hseguard_types::SubscriptionId(self.id)
    }

    /// Convert to domain TenantId
    pub fn tenant_id(&self) -> hseguard_types::TenantId {
        hseguard_types::TenantId(self.tenant_id)
    }
}
