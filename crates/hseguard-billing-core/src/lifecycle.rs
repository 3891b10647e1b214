//! Subscription lifecycle service
//!
//! Loads the aggregate, applies a pure transition, persists state, history,
//! payment and limit snapshots in one transaction, then publishes events.
//! A lost version race is returned to the caller as
//! [`BillingError::Conflict`]; foreground operations do not retry.

use std::sync::Arc;

use hseguard_db::RepositorySet;
use hseguard_types::{
    DomainEvent, Payment, PaymentId, Plan, PlanId, SubscriptionHistoryEntry, SubscriptionId,
    SubscriptionOperation, SubscriptionStatus, SubscriptionSummary, TenantId,
};
use tracing::instrument;

use crate::catalog::{plan_from_record, PlanCatalog};
use crate::clock::Clock;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::notify::{EventPublisher, NotificationKind, NotificationSender};
use crate::payment::PaymentRequest;
use crate::subscription::{Subscription, Transition, TransitionContext};
use crate::usage::usage_from_row;

/// Subscription lifecycle service
#[derive(Clone)]
pub struct SubscriptionService {
    pub(crate) repos: RepositorySet,
    pub(crate) catalog: PlanCatalog,
    pub(crate) config: BillingConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) notifier: Arc<dyn NotificationSender>,
    events: Arc<dyn EventPublisher>,
}

impl SubscriptionService {
    /// Create a new subscription service
    pub fn new(
        repos: RepositorySet,
        config: BillingConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSender>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let catalog = PlanCatalog::new(Arc::clone(&repos.plans), config.plan_cache_ttl);
        Self {
            repos,
            catalog,
            config,
            clock,
            notifier,
            events,
        }
    }

    /// Plan catalog shared with the usage tracker
    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Active configuration
    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Start a trial for a tenant that has no current subscription
    #[instrument(skip(self), fields(tenant_id = %tenant_id, plan_id = %plan_id))]
    pub async fn create_trial_subscription(
        &self,
        tenant_id: TenantId,
        plan_id: PlanId,
        actor: &str,
    ) -> BillingResult<Subscription> {
        let tenant = self
            .repos
            .tenants
            .find_by_id(tenant_id.0)
            .await?
            .ok_or(BillingError::TenantNotFound(tenant_id))?;
        if !tenant.is_active {
            return Err(BillingError::TenantInactive(tenant_id));
        }

        if self
            .repos
            .subscriptions
            .find_current_by_tenant(tenant_id.0)
            .await?
            .is_some()
        {
            return Err(BillingError::ActiveSubscriptionExists(tenant_id));
        }

        let plan = self.catalog.get(plan_id).await?;
        let ctx = self.context(actor);
        let transition =
            Subscription::start_trial(tenant_id, &plan, self.config.trial_period, &ctx)?;

        // The partial unique index catches a trial created concurrently
        let row = self
            .repos
            .subscriptions
            .create(transition.to_create())
            .await
            .map_err(|e| match BillingError::from(e) {
                BillingError::Conflict(_) => BillingError::ActiveSubscriptionExists(tenant_id),
                other => other,
            })?;
        let created = Subscription::try_from(row)?;

        metrics::counter!("subscription_transitions_total", "operation" => "create_trial")
            .increment(1);
        tracing::info!(
            subscription_id = %created.id(),
            end_date = %created.end_date(),
            "Trial subscription created"
        );

        self.publish(transition.events);
        self.notify(
            tenant_id,
            "Trial started",
            &format!(
                "Your trial of {} runs until {}.",
                plan.name,
                created.end_date().format("%Y-%m-%d")
            ),
            NotificationKind::Info,
        )
        .await;

        Ok(created)
    }

    /// Convert a trial to paid, or reactivate a suspended subscription
    #[instrument(skip(self, payment), fields(subscription_id = %subscription_id, amount_minor = payment.amount_minor))]
    pub async fn activate_subscription(
        &self,
        subscription_id: SubscriptionId,
        payment: PaymentRequest,
        actor: &str,
    ) -> BillingResult<Subscription> {
        let current = self.load(subscription_id).await?;
        let plan = self.catalog.get(current.plan_id()).await?;
        let transition = current.activate(&plan, &payment, &self.context(actor))?;
        let saved = self.persist(&current, transition).await?;

        self.notify(
            saved.tenant_id(),
            "Subscription active",
            &format!(
                "Your {} subscription is active until {}.",
                plan.name,
                saved.end_date().format("%Y-%m-%d")
            ),
            NotificationKind::Info,
        )
        .await;

        Ok(saved)
    }

    /// Extend an active subscription by one billing cycle
    #[instrument(skip(self, payment), fields(subscription_id = %subscription_id, amount_minor = payment.amount_minor))]
    pub async fn renew_subscription(
        &self,
        subscription_id: SubscriptionId,
        payment: PaymentRequest,
        actor: &str,
    ) -> BillingResult<Subscription> {
        let current = self.load(subscription_id).await?;
        let plan = self.catalog.get(current.plan_id()).await?;
        let transition = current.renew(
            &plan,
            &payment,
            self.config.renewal_window,
            &self.context(actor),
        )?;
        self.persist(&current, transition).await
    }

    /// Move an active subscription to another plan
    #[instrument(skip(self), fields(subscription_id = %subscription_id, new_plan_id = %new_plan_id))]
    pub async fn change_plan(
        &self,
        subscription_id: SubscriptionId,
        new_plan_id: PlanId,
        actor: &str,
    ) -> BillingResult<Subscription> {
        let current = self.load(subscription_id).await?;
        let current_plan = self.catalog.get(current.plan_id()).await?;
        let new_plan = self.catalog.get(new_plan_id).await?;

        let usages = self
            .repos
            .usage
            .list_by_tenant(current.tenant_id().0)
            .await?
            .into_iter()
            .map(usage_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let transition =
            current.change_plan(&current_plan, &new_plan, &usages, &self.context(actor))?;
        let saved = self.persist(&current, transition).await?;

        self.notify(
            saved.tenant_id(),
            "Plan changed",
            &format!("Your subscription moved from {} to {}.", current_plan.name, new_plan.name),
            NotificationKind::Info,
        )
        .await;

        Ok(saved)
    }

    /// Withhold access pending payment
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn suspend_subscription(
        &self,
        subscription_id: SubscriptionId,
        reason: &str,
        actor: &str,
    ) -> BillingResult<Subscription> {
        let current = self.load(subscription_id).await?;
        let transition =
            current.suspend(reason, self.config.grace_period, &self.context(actor))?;
        let saved = self.persist(&current, transition).await?;

        if let Some(grace_end) = saved.grace_period_end() {
            self.notify(
                saved.tenant_id(),
                "Subscription suspended",
                &format!(
                    "Your subscription was suspended: {reason}. Reactivate before {} to keep your data.",
                    grace_end.format("%Y-%m-%d")
                ),
                NotificationKind::Alert,
            )
            .await;
        }

        Ok(saved)
    }

    /// Cancel a subscription
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn cancel_subscription(
        &self,
        subscription_id: SubscriptionId,
        reason: &str,
        actor: &str,
    ) -> BillingResult<Subscription> {
        let current = self.load(subscription_id).await?;
        let transition = current.cancel(reason, &self.context(actor))?;
        let saved = self.persist(&current, transition).await?;

        self.notify(
            saved.tenant_id(),
            "Subscription cancelled",
            &format!("Your subscription was cancelled: {reason}."),
            NotificationKind::Info,
        )
        .await;

        Ok(saved)
    }

    /// Turn automatic renewal on or off for the tenant's current subscription
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn set_auto_renew(
        &self,
        tenant_id: TenantId,
        enabled: bool,
        actor: &str,
    ) -> BillingResult<Subscription> {
        let current = self
            .get_current_subscription(tenant_id)
            .await?
            .ok_or(BillingError::SubscriptionNotFound)?;

        if current.auto_renew() == enabled {
            return Ok(current);
        }

        let transition = current.set_auto_renew(enabled, &self.context(actor))?;
        self.persist(&current, transition).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Get a subscription by ID
    pub async fn get_subscription(&self, subscription_id: SubscriptionId) -> BillingResult<Subscription> {
        self.load(subscription_id).await
    }

    /// The tenant's trial, active or suspended subscription, if any
    pub async fn get_current_subscription(
        &self,
        tenant_id: TenantId,
    ) -> BillingResult<Option<Subscription>> {
        self.repos
            .subscriptions
            .find_current_by_tenant(tenant_id.0)
            .await?
            .map(Subscription::try_from)
            .transpose()
            .map_err(Into::into)
    }

    /// Summary with days remaining and compliance percentage
    pub async fn get_subscription_summary(
        &self,
        subscription_id: SubscriptionId,
    ) -> BillingResult<SubscriptionSummary> {
        let sub = self.load(subscription_id).await?;
        let plan = self.catalog.get(sub.plan_id()).await?;
        Ok(sub.summary(&plan.name, self.clock.now()))
    }

    /// History entries, oldest first
    pub async fn list_history(
        &self,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Vec<SubscriptionHistoryEntry>> {
        let rows = self.repos.subscriptions.list_history(subscription_id.0).await?;

        rows.into_iter()
            .map(|row| -> BillingResult<SubscriptionHistoryEntry> {
                Ok(SubscriptionHistoryEntry {
                    subscription_id: SubscriptionId(row.subscription_id),
                    old_status: row
                        .old_status
                        .as_deref()
                        .map(str::parse::<SubscriptionStatus>)
                        .transpose()?,
                    new_status: row.new_status.parse()?,
                    operation: row
                        .operation
                        .as_deref()
                        .map(str::parse::<SubscriptionOperation>)
                        .transpose()?,
                    reason: row.reason,
                    actor: row.actor,
                    occurred_at: row.occurred_at,
                })
            })
            .collect()
    }

    /// Payments, oldest first
    pub async fn list_payments(&self, subscription_id: SubscriptionId) -> BillingResult<Vec<Payment>> {
        let rows = self.repos.subscriptions.list_payments(subscription_id.0).await?;

        rows.into_iter()
            .map(|row| -> BillingResult<Payment> {
                Ok(Payment {
                    id: PaymentId(row.id),
                    subscription_id: SubscriptionId(row.subscription_id),
                    amount_minor: row.amount_minor,
                    currency: row.currency,
                    status: row.status.parse()?,
                    transaction_id: row.transaction_id,
                    paid_at: row.paid_at,
                })
            })
            .collect()
    }

    /// Plans open for new subscriptions
    pub async fn list_available_plans(&self) -> BillingResult<Vec<Plan>> {
        let records = self.repos.plans.list_active().await?;
        records
            .into_iter()
            .map(|record| plan_from_record(record).map_err(Into::into))
            .collect()
    }

    // =========================================================================
    // Internals shared with the sweeper
    // =========================================================================

    pub(crate) fn context(&self, actor: &str) -> TransitionContext {
        TransitionContext::new(self.clock.now(), actor)
    }

    pub(crate) async fn load(&self, subscription_id: SubscriptionId) -> BillingResult<Subscription> {
        let row = self
            .repos
            .subscriptions
            .find_by_id(subscription_id.0)
            .await?
            .ok_or(BillingError::SubscriptionNotFound)?;
        Ok(Subscription::try_from(row)?)
    }

    /// Write a transition of `current` and publish its events after commit
    pub(crate) async fn persist(
        &self,
        current: &Subscription,
        transition: Transition,
    ) -> BillingResult<Subscription> {
        let write = transition.to_write(current.version());
        let row = self.repos.subscriptions.apply_transition(write).await?;
        let saved = Subscription::try_from(row)?;

        let operation = transition
            .operation()
            .map_or("create_trial", |op| op.as_str());
        metrics::counter!("subscription_transitions_total", "operation" => operation).increment(1);
        tracing::info!(
            subscription_id = %saved.id(),
            tenant_id = %saved.tenant_id(),
            operation,
            from = %current.status(),
            to = %saved.status(),
            version = saved.version(),
            "Subscription transition applied"
        );

        self.publish(transition.events);
        Ok(saved)
    }

    pub(crate) async fn notify(
        &self,
        tenant_id: TenantId,
        subject: &str,
        message: &str,
        kind: NotificationKind,
    ) -> bool {
        match self
            .notifier
            .send_system_notification(tenant_id, subject, message, kind)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(tenant_id = %tenant_id, subject, error = %e, "Notification failed");
                false
            }
        }
    }

    fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            tracing::debug!(event = event.name(), "Publishing domain event");
            self.events.publish(event);
        }
    }
}

impl std::fmt::Debug for SubscriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
