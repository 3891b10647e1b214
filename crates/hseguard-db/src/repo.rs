//! Repository traits
//!
//! Define async repository interfaces for database operations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DbResult;
use crate::models::*;

/// Tenant repository trait
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Find a tenant by ID
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<TenantRow>>;

    /// Create a new tenant
    async fn create(&self, tenant: CreateTenant) -> DbResult<TenantRow>;

    /// Mark a tenant inactive. Returns `NotFound` for unknown IDs.
    async fn deactivate(&self, id: Uuid, actor: &str, at: DateTime<Utc>) -> DbResult<()>;
}

/// Create tenant input
#[derive(Debug, Clone)]
pub struct CreateTenant {
    pub id: Uuid,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Plan repository trait
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Find a plan and its features by ID
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PlanRecord>>;

    /// List plans open for new subscriptions
    async fn list_active(&self) -> DbResult<Vec<PlanRecord>>;

    /// Create a plan with its features
    async fn create(&self, plan: CreatePlan) -> DbResult<PlanRecord>;
}

/// Create plan input
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub id: Uuid,
    pub name: String,
    pub plan_type: String,
    pub billing_cycle: String,
    pub price_minor: i64,
    pub currency: String,
    pub features: Vec<CreatePlanFeature>,
}

/// Create plan feature input
#[derive(Debug, Clone)]
pub struct CreatePlanFeature {
    pub code: String,
    pub display_name: String,
    pub kind: String,
    pub enabled: bool,
    pub usage_limit: Option<i64>,
    pub reset_period: String,
}

/// Subscription repository trait
///
/// Writes that change a subscription take the version the caller read and
/// fail with `DbError::Conflict` when the stored version differs.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Find a subscription by ID
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SubscriptionRow>>;

    /// Find the tenant's non-terminal (trial, active or suspended) subscription
    async fn find_current_by_tenant(&self, tenant_id: Uuid) -> DbResult<Option<SubscriptionRow>>;

    /// Find subscriptions the sweeper may need to expire at `now`.
    /// Auto-renewing ones qualify only if they ended before `renewal_cutoff`.
    async fn find_expiration_candidates(
        &self,
        now: DateTime<Utc>,
        renewal_cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<SubscriptionRow>>;

    /// Find trial or active subscriptions ending in `[from, until]`
    async fn find_ending_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DbResult<Vec<SubscriptionRow>>;

    /// Insert a subscription and its creation history entry atomically
    async fn create(&self, sub: CreateSubscription) -> DbResult<SubscriptionRow>;

    /// Apply a transition atomically: state update, history append, optional
    /// payment and usage-limit snapshots
    async fn apply_transition(&self, write: TransitionWrite) -> DbResult<SubscriptionRow>;

    /// Record the expiration warning threshold last sent
    async fn set_notified_threshold(
        &self,
        id: Uuid,
        expected_version: i64,
        threshold_days: i32,
    ) -> DbResult<SubscriptionRow>;

    /// History entries, oldest first
    async fn list_history(&self, id: Uuid) -> DbResult<Vec<SubscriptionHistoryRow>>;

    /// Payments, oldest first
    async fn list_payments(&self, id: Uuid) -> DbResult<Vec<PaymentRow>>;
}

/// Create subscription input
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub history: NewHistoryEntry,
}

/// Mutable subscription columns written by a transition
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
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
    pub updated_at: DateTime<Utc>,
}

/// History entry to append
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub old_status: Option<String>,
    pub new_status: String,
    pub operation: Option<String>,
    pub reason: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

/// Create payment input
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub transaction_id: String,
    pub paid_at: DateTime<Utc>,
}

/// Usage-limit snapshot rewritten on plan change
#[derive(Debug, Clone)]
pub struct UsageLimitSnapshot {
    pub feature_code: String,
    pub usage_limit: Option<i64>,
    pub reset_period: String,
    pub next_reset_date: Option<DateTime<Utc>>,
}

/// Everything one transition writes, committed or rolled back together
#[derive(Debug, Clone)]
pub struct TransitionWrite {
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    pub expected_version: i64,
    pub update: SubscriptionUpdate,
    pub history: NewHistoryEntry,
    pub payment: Option<CreatePayment>,
    pub usage_limits: Vec<UsageLimitSnapshot>,
}

/// Feature usage repository trait
#[async_trait]
pub trait FeatureUsageRepository: Send + Sync {
    /// Find the counter for one tenant feature
    async fn find(&self, tenant_id: Uuid, feature_code: &str) -> DbResult<Option<FeatureUsageRow>>;

    /// All counters of a tenant
    async fn list_by_tenant(&self, tenant_id: Uuid) -> DbResult<Vec<FeatureUsageRow>>;

    /// Insert a new counter. `Conflict` if one already exists.
    async fn insert(&self, usage: CreateFeatureUsage) -> DbResult<FeatureUsageRow>;

    /// Set the counter to an absolute value
    async fn update_usage(
        &self,
        tenant_id: Uuid,
        feature_code: &str,
        expected_version: i64,
        current_usage: i64,
        at: DateTime<Utc>,
    ) -> DbResult<FeatureUsageRow>;

    /// Zero the counter and move its next reset date
    async fn reset(
        &self,
        tenant_id: Uuid,
        feature_code: &str,
        expected_version: i64,
        next_reset_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> DbResult<FeatureUsageRow>;

    /// Periodic counters whose reset date is at or before `now`
    async fn find_due_for_reset(&self, now: DateTime<Utc>) -> DbResult<Vec<FeatureUsageRow>>;
}

/// Create feature usage input
#[derive(Debug, Clone)]
pub struct CreateFeatureUsage {
    pub tenant_id: Uuid,
    pub feature_code: String,
    pub current_usage: i64,
    pub usage_limit: Option<i64>,
    pub reset_period: String,
    pub next_reset_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Type-erased repository handles shared by the billing core
#[derive(Clone)]
pub struct RepositorySet {
    pub tenants: Arc<dyn TenantRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub usage: Arc<dyn FeatureUsageRepository>,
}

impl std::fmt::Debug for RepositorySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySet").finish_non_exhaustive()
    }
}
