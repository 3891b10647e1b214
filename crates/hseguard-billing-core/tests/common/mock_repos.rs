//! Mock repositories for testing
//!
//! In-memory repositories with the same version checks as the PostgreSQL
//! implementations, plus failure injection for sweep tests.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use hseguard_db::{
    CreateFeatureUsage, CreatePlan, CreateSubscription, CreateTenant, DbError, DbResult,
    FeatureUsageRepository, FeatureUsageRow, NewHistoryEntry, PaymentRow, PlanFeatureRow,
    PlanRecord, PlanRepository, PlanRow, SubscriptionHistoryRow, SubscriptionRepository,
    SubscriptionRow, TenantRepository, TenantRow, TransitionWrite, UsageLimitSnapshot,
};
use uuid::Uuid;

const CURRENT_STATUSES: [&str; 3] = ["trial", "active", "suspended"];

/// In-memory tenant repository
#[derive(Default, Clone)]
pub struct MockTenantRepository {
    tenants: Arc<DashMap<Uuid, TenantRow>>,
}

impl MockTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantRepository for MockTenantRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<TenantRow>> {
        Ok(self.tenants.get(&id).map(|r| r.value().clone()))
    }

    async fn create(&self, tenant: CreateTenant) -> DbResult<TenantRow> {
        if self.tenants.contains_key(&tenant.id) {
            return Err(DbError::Conflict("tenant already exists".into()));
        }
        let row = TenantRow {
            id: tenant.id,
            name: tenant.name,
            is_active: true,
            created_at: tenant.created_at,
            created_by: tenant.created_by,
            deactivated_at: None,
            deactivated_by: None,
        };
        self.tenants.insert(row.id, row.clone());
        Ok(row)
    }

    async fn deactivate(&self, id: Uuid, actor: &str, at: DateTime<Utc>) -> DbResult<()> {
        let mut tenant = self.tenants.get_mut(&id).ok_or(DbError::NotFound)?;
        tenant.is_active = false;
        tenant.deactivated_at = Some(at);
        tenant.deactivated_by = Some(actor.to_string());
        Ok(())
    }
}

/// In-memory plan repository
#[derive(Default, Clone)]
pub struct MockPlanRepository {
    plans: Arc<DashMap<Uuid, PlanRecord>>,
}

impl MockPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip a plan's active flag directly
    #[allow(dead_code)]
    pub fn set_active(&self, id: Uuid, active: bool) {
        if let Some(mut record) = self.plans.get_mut(&id) {
            record.plan.is_active = active;
        }
    }
}

#[async_trait]
impl PlanRepository for MockPlanRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PlanRecord>> {
        Ok(self.plans.get(&id).map(|r| r.value().clone()))
    }

    async fn list_active(&self) -> DbResult<Vec<PlanRecord>> {
        let mut plans: Vec<PlanRecord> = self
            .plans
            .iter()
            .filter(|r| r.plan.is_active)
            .map(|r| r.value().clone())
            .collect();
        plans.sort_by_key(|r| r.plan.price_minor);
        Ok(plans)
    }

    async fn create(&self, plan: CreatePlan) -> DbResult<PlanRecord> {
        let record = PlanRecord {
            plan: PlanRow {
                id: plan.id,
                name: plan.name,
                plan_type: plan.plan_type,
                billing_cycle: plan.billing_cycle,
                price_minor: plan.price_minor,
                currency: plan.currency,
                is_active: true,
                created_at: Utc::now(),
            },
            features: plan
                .features
                .into_iter()
                .enumerate()
                .map(|(position, f)| PlanFeatureRow {
                    plan_id: plan.id,
                    position: position as i32,
                    code: f.code,
                    display_name: f.display_name,
                    kind: f.kind,
                    enabled: f.enabled,
                    usage_limit: f.usage_limit,
                    reset_period: f.reset_period,
                })
                .collect(),
        };
        self.plans.insert(plan.id, record.clone());
        Ok(record)
    }
}

/// In-memory feature usage repository
#[derive(Default, Clone)]
pub struct MockFeatureUsageRepository {
    usages: Arc<DashMap<(Uuid, String), FeatureUsageRow>>,
    /// Number of upcoming `update_usage` calls that lose a race to a
    /// simulated concurrent +1
    races: Arc<AtomicU32>,
}

impl MockFeatureUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a counter directly
    #[allow(dead_code)]
    pub fn put(&self, row: FeatureUsageRow) {
        self.usages
            .insert((row.tenant_id, row.feature_code.clone()), row);
    }

    /// Read a counter directly
    #[allow(dead_code)]
    pub fn get(&self, tenant_id: Uuid, code: &str) -> Option<FeatureUsageRow> {
        self.usages
            .get(&(tenant_id, code.to_string()))
            .map(|r| r.value().clone())
    }

    /// Make the next `count` updates lose a race
    #[allow(dead_code)]
    pub fn race_next_updates(&self, count: u32) {
        self.races.store(count, Ordering::SeqCst);
    }

    fn apply_limit(&self, tenant_id: Uuid, snapshot: UsageLimitSnapshot, at: DateTime<Utc>) {
        if let Some(mut row) = self.usages.get_mut(&(tenant_id, snapshot.feature_code)) {
            row.usage_limit = snapshot.usage_limit;
            row.reset_period = snapshot.reset_period;
            row.next_reset_date = snapshot.next_reset_date;
            row.updated_at = at;
            row.version += 1;
        }
    }

    fn versioned_update(
        &self,
        tenant_id: Uuid,
        code: &str,
        expected_version: i64,
        apply: impl FnOnce(&mut FeatureUsageRow),
    ) -> DbResult<FeatureUsageRow> {
        let mut row = self
            .usages
            .get_mut(&(tenant_id, code.to_string()))
            .ok_or(DbError::NotFound)?;
        if row.version != expected_version {
            return Err(DbError::Conflict(format!(
                "usage {code} is at version {}, expected {expected_version}",
                row.version
            )));
        }
        apply(&mut row);
        row.version += 1;
        Ok(row.clone())
    }
}

#[async_trait]
impl FeatureUsageRepository for MockFeatureUsageRepository {
    async fn find(&self, tenant_id: Uuid, feature_code: &str) -> DbResult<Option<FeatureUsageRow>> {
        Ok(self.get(tenant_id, feature_code))
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> DbResult<Vec<FeatureUsageRow>> {
        let mut rows: Vec<FeatureUsageRow> = self
            .usages
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.feature_code.cmp(&b.feature_code));
        Ok(rows)
    }

    async fn insert(&self, usage: CreateFeatureUsage) -> DbResult<FeatureUsageRow> {
        let key = (usage.tenant_id, usage.feature_code.clone());
        let row = FeatureUsageRow {
            tenant_id: usage.tenant_id,
            feature_code: usage.feature_code,
            current_usage: usage.current_usage,
            usage_limit: usage.usage_limit,
            reset_period: usage.reset_period,
            next_reset_date: usage.next_reset_date,
            version: 1,
            updated_at: usage.created_at,
        };
        match self.usages.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DbError::Conflict("feature usage already exists".into()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(row)
            }
        }
    }

    async fn update_usage(
        &self,
        tenant_id: Uuid,
        feature_code: &str,
        expected_version: i64,
        current_usage: i64,
        at: DateTime<Utc>,
    ) -> DbResult<FeatureUsageRow> {
        let raced = self
            .races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if raced {
            let version = self.get(tenant_id, feature_code).map_or(0, |r| r.version);
            self.versioned_update(tenant_id, feature_code, version, |row| {
                row.current_usage += 1;
            })?;
        }

        self.versioned_update(tenant_id, feature_code, expected_version, |row| {
            row.current_usage = current_usage;
            row.updated_at = at;
        })
    }

    async fn reset(
        &self,
        tenant_id: Uuid,
        feature_code: &str,
        expected_version: i64,
        next_reset_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> DbResult<FeatureUsageRow> {
        self.versioned_update(tenant_id, feature_code, expected_version, |row| {
            row.current_usage = 0;
            row.next_reset_date = Some(next_reset_date);
            row.updated_at = at;
        })
    }

    async fn find_due_for_reset(&self, now: DateTime<Utc>) -> DbResult<Vec<FeatureUsageRow>> {
        Ok(self
            .usages
            .iter()
            .filter(|r| r.reset_period != "none" && r.next_reset_date.is_some_and(|d| d <= now))
            .map(|r| r.value().clone())
            .collect())
    }
}

/// Write applied by a simulated concurrent caller
type Interleaved = Box<dyn FnOnce(&mut SubscriptionRow) + Send + Sync>;

/// In-memory subscription repository
#[derive(Default, Clone)]
pub struct MockSubscriptionRepository {
    subscriptions: Arc<DashMap<Uuid, SubscriptionRow>>,
    history: Arc<DashMap<Uuid, Vec<SubscriptionHistoryRow>>>,
    payments: Arc<DashMap<Uuid, Vec<PaymentRow>>>,
    next_history_id: Arc<AtomicI64>,
    /// Subscriptions whose transition writes fail
    failing: Arc<DashSet<Uuid>>,
    /// Writes that land just before the next transition for a subscription
    interleaved: Arc<DashMap<Uuid, Interleaved>>,
    usage: MockFeatureUsageRepository,
}

impl MockSubscriptionRepository {
    /// Create a repository that rewrites limit snapshots in `usage`
    pub fn new(usage: MockFeatureUsageRepository) -> Self {
        Self {
            usage,
            ..Self::default()
        }
    }

    /// Make every transition write for `id` fail
    #[allow(dead_code)]
    pub fn fail_writes_for(&self, id: Uuid) {
        self.failing.insert(id);
    }

    /// Read a row directly
    #[allow(dead_code)]
    pub fn get(&self, id: Uuid) -> Option<SubscriptionRow> {
        self.subscriptions.get(&id).map(|r| r.value().clone())
    }

    /// Overwrite a row directly, bumping its version like a concurrent writer
    #[allow(dead_code)]
    pub fn tamper(&self, id: Uuid, apply: impl FnOnce(&mut SubscriptionRow)) {
        if let Some(mut row) = self.subscriptions.get_mut(&id) {
            apply(&mut row);
            row.version += 1;
        }
    }

    /// Let another writer change the row right before the next transition
    /// for `id` is applied
    #[allow(dead_code)]
    pub fn interleave(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut SubscriptionRow) + Send + Sync + 'static,
    ) {
        self.interleaved.insert(id, Box::new(apply));
    }

    /// Number of stored payments for a subscription
    #[allow(dead_code)]
    pub fn payment_count(&self, id: Uuid) -> usize {
        self.payments.get(&id).map_or(0, |p| p.len())
    }

    fn append_history(&self, subscription_id: Uuid, entry: NewHistoryEntry) {
        let row = SubscriptionHistoryRow {
            id: self.next_history_id.fetch_add(1, Ordering::SeqCst) + 1,
            subscription_id,
            old_status: entry.old_status,
            new_status: entry.new_status,
            operation: entry.operation,
            reason: entry.reason,
            actor: entry.actor,
            occurred_at: entry.occurred_at,
        };
        self.history.entry(subscription_id).or_default().push(row);
    }

    fn has_current(&self, tenant_id: Uuid, except: Option<Uuid>) -> bool {
        self.subscriptions.iter().any(|r| {
            r.tenant_id == tenant_id
                && Some(r.id) != except
                && CURRENT_STATUSES.contains(&r.status.as_str())
        })
    }
}

#[async_trait]
impl SubscriptionRepository for MockSubscriptionRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SubscriptionRow>> {
        Ok(self.get(id))
    }

    async fn find_current_by_tenant(&self, tenant_id: Uuid) -> DbResult<Option<SubscriptionRow>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|r| r.tenant_id == tenant_id && CURRENT_STATUSES.contains(&r.status.as_str()))
            .max_by_key(|r| r.created_at)
            .map(|r| r.value().clone()))
    }

    async fn find_expiration_candidates(
        &self,
        now: DateTime<Utc>,
        renewal_cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<SubscriptionRow>> {
        let mut rows: Vec<SubscriptionRow> = self
            .subscriptions
            .iter()
            .filter(|r| match r.status.as_str() {
                "active" if r.auto_renew => r.end_date < renewal_cutoff,
                "active" => r.end_date < now,
                "trial" => r.end_date < now,
                "suspended" => r.grace_period_end.is_some_and(|g| g < now),
                _ => false,
            })
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| r.end_date);
        Ok(rows)
    }

    async fn find_ending_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DbResult<Vec<SubscriptionRow>> {
        let mut rows: Vec<SubscriptionRow> = self
            .subscriptions
            .iter()
            .filter(|r| {
                matches!(r.status.as_str(), "trial" | "active")
                    && r.end_date >= from
                    && r.end_date <= until
            })
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| r.end_date);
        Ok(rows)
    }

    async fn create(&self, sub: CreateSubscription) -> DbResult<SubscriptionRow> {
        if CURRENT_STATUSES.contains(&sub.status.as_str()) && self.has_current(sub.tenant_id, None) {
            return Err(DbError::Conflict(
                "current subscription for tenant already exists".into(),
            ));
        }

        let row = SubscriptionRow {
            id: sub.id,
            tenant_id: sub.tenant_id,
            plan_id: sub.plan_id,
            status: sub.status,
            start_date: sub.start_date,
            end_date: sub.end_date,
            next_billing_date: sub.next_billing_date,
            auto_renew: sub.auto_renew,
            grace_period_end: None,
            suspended_at: None,
            suspended_seconds: 0,
            last_notified_threshold: None,
            cancel_reason: None,
            created_at: sub.created_at,
            created_by: sub.created_by,
            updated_at: sub.created_at,
            version: 1,
        };
        self.subscriptions.insert(row.id, row.clone());
        self.append_history(row.id, sub.history);
        Ok(row)
    }

    async fn apply_transition(&self, write: TransitionWrite) -> DbResult<SubscriptionRow> {
        if self.failing.contains(&write.subscription_id) {
            return Err(DbError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        if let Some((id, apply)) = self.interleaved.remove(&write.subscription_id) {
            self.tamper(id, apply);
        }

        let saved = {
            let mut row = self
                .subscriptions
                .get_mut(&write.subscription_id)
                .ok_or(DbError::NotFound)?;
            if row.version != write.expected_version {
                return Err(DbError::Conflict(format!(
                    "subscription {} is at version {}, expected {}",
                    row.id, row.version, write.expected_version
                )));
            }

            let update = write.update;
            row.plan_id = update.plan_id;
            row.status = update.status;
            row.start_date = update.start_date;
            row.end_date = update.end_date;
            row.next_billing_date = update.next_billing_date;
            row.auto_renew = update.auto_renew;
            row.grace_period_end = update.grace_period_end;
            row.suspended_at = update.suspended_at;
            row.suspended_seconds = update.suspended_seconds;
            row.last_notified_threshold = update.last_notified_threshold;
            row.cancel_reason = update.cancel_reason;
            row.updated_at = update.updated_at;
            row.version += 1;
            row.clone()
        };

        self.append_history(saved.id, write.history);
        if let Some(payment) = write.payment {
            self.payments.entry(saved.id).or_default().push(PaymentRow {
                id: payment.id,
                subscription_id: saved.id,
                amount_minor: payment.amount_minor,
                currency: payment.currency,
                status: payment.status,
                transaction_id: payment.transaction_id,
                paid_at: payment.paid_at,
            });
        }
        for snapshot in write.usage_limits {
            self.usage
                .apply_limit(write.tenant_id, snapshot, saved.updated_at);
        }

        Ok(saved)
    }

    async fn set_notified_threshold(
        &self,
        id: Uuid,
        expected_version: i64,
        threshold_days: i32,
    ) -> DbResult<SubscriptionRow> {
        let mut row = self.subscriptions.get_mut(&id).ok_or(DbError::NotFound)?;
        if row.version != expected_version {
            return Err(DbError::Conflict(format!(
                "subscription {id} is at version {}, expected {expected_version}",
                row.version
            )));
        }
        row.last_notified_threshold = Some(threshold_days);
        row.version += 1;
        Ok(row.clone())
    }

    async fn list_history(&self, id: Uuid) -> DbResult<Vec<SubscriptionHistoryRow>> {
        Ok(self.history.get(&id).map(|h| h.clone()).unwrap_or_default())
    }

    async fn list_payments(&self, id: Uuid) -> DbResult<Vec<PaymentRow>> {
        Ok(self.payments.get(&id).map(|p| p.clone()).unwrap_or_default())
    }
}
