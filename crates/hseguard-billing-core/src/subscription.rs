//! Subscription aggregate and its transitions
//!
//! [`Subscription`] fields are private; state only changes through the
//! transition methods below. Each one takes the current state by reference
//! and returns a [`Transition`] describing the new state, the single history
//! entry to append, an optional payment, plan-limit snapshots to rewrite and
//! the events to publish once everything is committed. Nothing here touches
//! storage or the clock.

use chrono::{DateTime, Duration, Utc};
use hseguard_db::{
    CreatePayment, CreateSubscription, NewHistoryEntry, SubscriptionRow, SubscriptionUpdate,
    TransitionWrite, UsageLimitSnapshot,
};
use hseguard_types::{
    DomainEvent, FeatureCode, FeatureUsage, ParseError, Payment, PaymentId, PaymentStatus, Plan,
    PlanId, ResetPeriod, SubscriptionHistoryEntry, SubscriptionId, SubscriptionOperation,
    SubscriptionStatus, SubscriptionSummary, TenantId, UsageLimit,
};

use crate::error::{BillingError, BillingResult};
use crate::payment::PaymentRequest;

use SubscriptionStatus::{Active, Cancelled, Expired, Suspended, Trial};

const SECONDS_PER_DAY: i64 = 86_400;

/// Who is acting, and when
#[derive(Debug, Clone)]
pub struct TransitionContext {
    /// Instant the transition takes effect
    pub now: DateTime<Utc>,
    /// User or process recorded in history
    pub actor: String,
}

impl TransitionContext {
    /// Create a context
    pub fn new(now: DateTime<Utc>, actor: impl Into<String>) -> Self {
        Self {
            now,
            actor: actor.into(),
        }
    }
}

/// Plan limit copied onto a tenant's usage counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitSnapshot {
    /// Feature code
    pub feature_code: FeatureCode,
    /// New cap
    pub usage_limit: UsageLimit,
    /// New reset cadence
    pub reset_period: ResetPeriod,
    /// Next reset under the new cadence, `None` when it does not reset
    pub next_reset_date: Option<DateTime<Utc>>,
}

/// Outcome of a successful transition, not yet persisted
#[derive(Debug, Clone)]
pub struct Transition {
    /// State after the transition
    pub subscription: Subscription,
    /// The one history entry this transition appends
    pub history: SubscriptionHistoryEntry,
    /// Payment recorded by activation and renewal
    pub payment: Option<Payment>,
    /// Usage limits to rewrite (plan change only)
    pub usage_limits: Vec<LimitSnapshot>,
    /// Events to publish after commit
    pub events: Vec<DomainEvent>,
}

impl Transition {
    /// Operation that produced this transition (`None` for creation)
    pub fn operation(&self) -> Option<SubscriptionOperation> {
        self.history.operation
    }

    /// Storage write for an update of the row at `expected_version`
    pub(crate) fn to_write(&self, expected_version: i64) -> TransitionWrite {
        let sub = &self.subscription;
        TransitionWrite {
            subscription_id: sub.id.0,
            tenant_id: sub.tenant_id.0,
            expected_version,
            update: sub.to_update(),
            history: history_to_row(&self.history),
            payment: self.payment.as_ref().map(|p| CreatePayment {
                id: p.id.0,
                amount_minor: p.amount_minor,
                currency: p.currency.clone(),
                status: p.status.as_str().to_string(),
                transaction_id: p.transaction_id.clone(),
                paid_at: p.paid_at,
            }),
            usage_limits: self
                .usage_limits
                .iter()
                .map(|s| UsageLimitSnapshot {
                    feature_code: s.feature_code.as_str().to_string(),
                    usage_limit: s.usage_limit.as_option(),
                    reset_period: s.reset_period.as_str().to_string(),
                    next_reset_date: s.next_reset_date,
                })
                .collect(),
        }
    }

    /// Storage insert for a newly started subscription
    pub(crate) fn to_create(&self) -> CreateSubscription {
        let sub = &self.subscription;
        CreateSubscription {
            id: sub.id.0,
            tenant_id: sub.tenant_id.0,
            plan_id: sub.plan_id.0,
            status: sub.status.as_str().to_string(),
            start_date: sub.start_date,
            end_date: sub.end_date,
            next_billing_date: sub.next_billing_date,
            auto_renew: sub.auto_renew,
            created_at: sub.created_at,
            created_by: sub.created_by.clone(),
            history: history_to_row(&self.history),
        }
    }
}

fn history_to_row(entry: &SubscriptionHistoryEntry) -> NewHistoryEntry {
    NewHistoryEntry {
        old_status: entry.old_status.map(|s| s.as_str().to_string()),
        new_status: entry.new_status.as_str().to_string(),
        operation: entry.operation.map(|op| op.as_str().to_string()),
        reason: entry.reason.clone(),
        actor: entry.actor.clone(),
        occurred_at: entry.occurred_at,
    }
}

/// A tenant's time-bounded entitlement to a plan
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    id: SubscriptionId,
    tenant_id: TenantId,
    plan_id: PlanId,
    status: SubscriptionStatus,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    next_billing_date: Option<DateTime<Utc>>,
    auto_renew: bool,
    grace_period_end: Option<DateTime<Utc>>,
    suspended_at: Option<DateTime<Utc>>,
    suspended_seconds: i64,
    last_notified_threshold: Option<u32>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    created_by: String,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = ParseError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: SubscriptionId(row.id),
            tenant_id: TenantId(row.tenant_id),
            plan_id: PlanId(row.plan_id),
            status: row.status.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            next_billing_date: row.next_billing_date,
            auto_renew: row.auto_renew,
            grace_period_end: row.grace_period_end,
            suspended_at: row.suspended_at,
            suspended_seconds: row.suspended_seconds,
            last_notified_threshold: row
                .last_notified_threshold
                .and_then(|days| u32::try_from(days).ok()),
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            created_by: row.created_by,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

impl Subscription {
    // =========================================================================
    // Accessors
    // =========================================================================

    /// Subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Owning tenant
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Current plan
    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    /// Current status
    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    /// Start of the current period
    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    /// End of the current period
    pub fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }

    /// Next billing date (paid subscriptions only)
    pub fn next_billing_date(&self) -> Option<DateTime<Utc>> {
        self.next_billing_date
    }

    /// Whether the subscription renews automatically
    pub fn auto_renew(&self) -> bool {
        self.auto_renew
    }

    /// Deadline for reactivation while suspended
    pub fn grace_period_end(&self) -> Option<DateTime<Utc>> {
        self.grace_period_end
    }

    /// Start of the ongoing suspension
    pub fn suspended_at(&self) -> Option<DateTime<Utc>> {
        self.suspended_at
    }

    /// Smallest expiration warning threshold already sent this period
    pub fn last_notified_threshold(&self) -> Option<u32> {
        self.last_notified_threshold
    }

    /// Reason given on cancellation
    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// Creator
    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last modification time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Optimistic concurrency version
    pub fn version(&self) -> i64 {
        self.version
    }

    // =========================================================================
    // Read-side projections
    // =========================================================================

    /// Whole days left in the period, rounded up, never negative
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        let seconds = (self.end_date - now).num_seconds();
        if seconds <= 0 {
            0
        } else {
            (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
        }
    }

    /// Share of the period actually served, in percent.
    ///
    /// Suspended time, including an ongoing suspension, does not count as
    /// served. Clamped to `[0, 100]`.
    pub fn compliance_percentage(&self, now: DateTime<Utc>) -> f64 {
        let total = (self.end_date - self.start_date).num_seconds();
        if total <= 0 {
            return 0.0;
        }

        let until = now.min(self.end_date);
        let elapsed = (until - self.start_date).num_seconds().max(0);
        let ongoing = self
            .suspended_at
            .map_or(0, |at| (until - at).num_seconds().max(0));
        let served = (elapsed - self.suspended_seconds - ongoing).max(0);

        (served as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Whether the sweeper should expire this subscription at `now`.
    ///
    /// An auto-renewing subscription whose renewal never arrived lapses once
    /// `grace_period` has passed after its end date.
    pub fn is_due_for_expiration(&self, now: DateTime<Utc>, grace_period: Duration) -> bool {
        match self.status {
            Trial => self.end_date < now,
            Active if self.auto_renew => self.end_date + grace_period < now,
            Active => self.end_date < now,
            Suspended => self.grace_period_end.is_some_and(|end| end < now),
            Cancelled | Expired => false,
        }
    }

    /// Expiration warning threshold to send at `now`, if any.
    ///
    /// Picks the smallest threshold at or above the days remaining and only
    /// returns it when it is lower than the last one sent.
    pub fn due_warning(&self, now: DateTime<Utc>, thresholds: &[u32]) -> Option<u32> {
        if !self.status.is_entitled() || self.end_date <= now {
            return None;
        }

        let days = self.days_remaining(now);
        let threshold = thresholds
            .iter()
            .copied()
            .filter(|t| i64::from(*t) >= days)
            .min()?;

        match self.last_notified_threshold {
            Some(sent) if sent <= threshold => None,
            _ => Some(threshold),
        }
    }

    /// Read-only summary for query endpoints
    pub fn summary(&self, plan_name: &str, now: DateTime<Utc>) -> SubscriptionSummary {
        SubscriptionSummary {
            id: self.id,
            tenant_id: self.tenant_id,
            plan_id: self.plan_id,
            plan_name: plan_name.to_string(),
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            next_billing_date: self.next_billing_date,
            auto_renew: self.auto_renew,
            grace_period_end: self.grace_period_end,
            days_remaining: self.days_remaining(now),
            compliance_percentage: self.compliance_percentage(now),
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Start a trial of `plan` for `tenant_id`
    pub fn start_trial(
        tenant_id: TenantId,
        plan: &Plan,
        trial_period: Duration,
        ctx: &TransitionContext,
    ) -> BillingResult<Transition> {
        if !plan.is_active {
            return Err(BillingError::invalid(format!(
                "plan '{}' is not open for new subscriptions",
                plan.name
            )));
        }
        if trial_period <= Duration::zero() {
            return Err(BillingError::invalid("trial period must be positive"));
        }

        let subscription = Self {
            id: SubscriptionId::new(),
            tenant_id,
            plan_id: plan.id,
            status: Trial,
            start_date: ctx.now,
            end_date: ctx.now + trial_period,
            next_billing_date: None,
            auto_renew: false,
            grace_period_end: None,
            suspended_at: None,
            suspended_seconds: 0,
            last_notified_threshold: None,
            cancel_reason: None,
            created_at: ctx.now,
            created_by: ctx.actor.clone(),
            updated_at: ctx.now,
            version: 1,
        };

        let history = SubscriptionHistoryEntry {
            subscription_id: subscription.id,
            old_status: None,
            new_status: Trial,
            operation: None,
            reason: format!("trial of plan '{}' started", plan.name),
            actor: ctx.actor.clone(),
            occurred_at: ctx.now,
        };

        let events = vec![DomainEvent::SubscriptionCreated {
            subscription_id: subscription.id,
            tenant_id,
            plan_id: plan.id,
            trial: true,
            occurred_at: ctx.now,
        }];

        Ok(Transition {
            subscription,
            history,
            payment: None,
            usage_limits: Vec::new(),
            events,
        })
    }

    /// Pay for a trial, or reactivate a suspended subscription
    pub fn activate(
        &self,
        plan: &Plan,
        payment: &PaymentRequest,
        ctx: &TransitionContext,
    ) -> BillingResult<Transition> {
        self.require(&[Trial, Suspended], SubscriptionOperation::Activate)?;
        payment.check()?;

        let mut next = self.clone();
        let (reason, lifecycle_event) = if self.status == Trial {
            next.start_date = ctx.now;
            next.end_date = advance_cycle(plan, ctx.now)?;
            let event = DomainEvent::SubscriptionCreated {
                subscription_id: self.id,
                tenant_id: self.tenant_id,
                plan_id: self.plan_id,
                trial: false,
                occurred_at: ctx.now,
            };
            ("trial converted to paid subscription".to_string(), event)
        } else {
            next.close_suspension(ctx.now);
            next.end_date = advance_cycle(plan, self.end_date.max(ctx.now))?;
            let event = DomainEvent::SubscriptionReactivated {
                subscription_id: self.id,
                tenant_id: self.tenant_id,
                occurred_at: ctx.now,
            };
            ("reactivated after payment".to_string(), event)
        };

        next.status = Active;
        next.next_billing_date = Some(next.end_date);
        next.grace_period_end = None;
        next.last_notified_threshold = None;

        let payment = self.completed_payment(payment, ctx.now);
        let events = vec![lifecycle_event, self.payment_event(&payment)];
        Ok(self.finish(next, SubscriptionOperation::Activate, reason, Some(payment), events, ctx))
    }

    /// Extend an active subscription by one billing cycle
    pub fn renew(
        &self,
        plan: &Plan,
        payment: &PaymentRequest,
        renewal_window: Duration,
        ctx: &TransitionContext,
    ) -> BillingResult<Transition> {
        self.require(&[Active], SubscriptionOperation::Renew)?;

        if !self.auto_renew {
            if let Some(next_billing) = self.next_billing_date {
                let opens_at = next_billing - renewal_window;
                if ctx.now < opens_at {
                    return Err(BillingError::RenewalNotDue { opens_at });
                }
            }
        }
        payment.check()?;

        let mut next = self.clone();
        next.end_date = advance_cycle(plan, self.end_date.max(ctx.now))?;
        next.next_billing_date = Some(next.end_date);
        next.last_notified_threshold = None;

        let payment = self.completed_payment(payment, ctx.now);
        let events = vec![
            DomainEvent::SubscriptionRenewed {
                subscription_id: self.id,
                tenant_id: self.tenant_id,
                new_end_date: next.end_date,
                occurred_at: ctx.now,
            },
            self.payment_event(&payment),
        ];
        Ok(self.finish(
            next,
            SubscriptionOperation::Renew,
            "renewed for one billing cycle".to_string(),
            Some(payment),
            events,
            ctx,
        ))
    }

    /// Move an active subscription to `new_plan`.
    ///
    /// Rejected when any counter in `usages` would not fit the new plan,
    /// either because the new cap is lower or because the new plan does not
    /// grant a feature that is in use.
    pub fn change_plan(
        &self,
        current_plan: &Plan,
        new_plan: &Plan,
        usages: &[FeatureUsage],
        ctx: &TransitionContext,
    ) -> BillingResult<Transition> {
        self.require(&[Active], SubscriptionOperation::ChangePlan)?;

        if new_plan.id == self.plan_id {
            return Err(BillingError::invalid(format!(
                "subscription is already on plan '{}'",
                new_plan.name
            )));
        }
        if !new_plan.is_active {
            return Err(BillingError::invalid(format!(
                "plan '{}' is not open for new subscriptions",
                new_plan.name
            )));
        }

        let blocked: Vec<String> = usages
            .iter()
            .filter(|u| u.current_usage > 0)
            .filter_map(|u| match new_plan.feature_limit(u.feature_code.as_str()) {
                None => Some(format!(
                    "{} is in use ({}) but not included in '{}'",
                    u.feature_code, u.current_usage, new_plan.name
                )),
                Some(limit) if !limit.permits(u.current_usage) => Some(format!(
                    "{} usage {} exceeds the new limit of {}",
                    u.feature_code, u.current_usage, limit
                )),
                Some(_) => None,
            })
            .collect();
        if !blocked.is_empty() {
            return Err(BillingError::DowngradeBlocked(blocked));
        }

        // A counter keeps its reset date while the cadence is unchanged;
        // a new cadence starts counting from the change.
        let usage_limits = new_plan
            .limit_features()
            .map(|f| {
                let existing = usages.iter().find(|u| u.feature_code == f.code);
                let next_reset_date = match existing {
                    Some(u) if u.reset_period == f.reset_period => u.next_reset_date,
                    _ => f.reset_period.advance(ctx.now),
                };
                LimitSnapshot {
                    feature_code: f.code.clone(),
                    usage_limit: UsageLimit::from_option(f.limit),
                    reset_period: f.reset_period,
                    next_reset_date,
                }
            })
            .collect();

        let mut next = self.clone();
        next.plan_id = new_plan.id;

        let events = vec![DomainEvent::PlanChanged {
            subscription_id: self.id,
            tenant_id: self.tenant_id,
            old_plan_id: self.plan_id,
            new_plan_id: new_plan.id,
            occurred_at: ctx.now,
        }];
        let reason = format!(
            "plan changed from '{}' to '{}'",
            current_plan.name, new_plan.name
        );
        let mut transition =
            self.finish(next, SubscriptionOperation::ChangePlan, reason, None, events, ctx);
        transition.usage_limits = usage_limits;
        Ok(transition)
    }

    /// Withhold access; reactivation stays possible for `grace_period`
    pub fn suspend(
        &self,
        reason: &str,
        grace_period: Duration,
        ctx: &TransitionContext,
    ) -> BillingResult<Transition> {
        self.require(&[Trial, Active], SubscriptionOperation::Suspend)?;
        if grace_period <= Duration::zero() {
            return Err(BillingError::invalid("grace period must be positive"));
        }

        let grace_period_end = ctx.now + grace_period;
        let mut next = self.clone();
        next.status = Suspended;
        next.suspended_at = Some(ctx.now);
        next.grace_period_end = Some(grace_period_end);

        let events = vec![DomainEvent::SubscriptionSuspended {
            subscription_id: self.id,
            tenant_id: self.tenant_id,
            reason: reason.to_string(),
            grace_period_end,
            occurred_at: ctx.now,
        }];
        Ok(self.finish(
            next,
            SubscriptionOperation::Suspend,
            reason.to_string(),
            None,
            events,
            ctx,
        ))
    }

    /// Terminate at the tenant's or an operator's request
    pub fn cancel(&self, reason: &str, ctx: &TransitionContext) -> BillingResult<Transition> {
        self.require(&[Trial, Active, Suspended], SubscriptionOperation::Cancel)?;

        let mut next = self.clone();
        next.close_suspension(ctx.now);
        next.status = Cancelled;
        next.auto_renew = false;
        next.grace_period_end = None;
        next.cancel_reason = Some(reason.to_string());

        let events = vec![DomainEvent::SubscriptionCancelled {
            subscription_id: self.id,
            tenant_id: self.tenant_id,
            reason: reason.to_string(),
            occurred_at: ctx.now,
        }];
        Ok(self.finish(
            next,
            SubscriptionOperation::Cancel,
            reason.to_string(),
            None,
            events,
            ctx,
        ))
    }

    /// Lapse a subscription whose period or grace period has passed
    pub fn expire(
        &self,
        grace_period: Duration,
        ctx: &TransitionContext,
    ) -> BillingResult<Transition> {
        if !self.is_due_for_expiration(ctx.now, grace_period) {
            return Err(BillingError::InvalidTransition {
                status: self.status,
                operation: SubscriptionOperation::Expire,
            });
        }

        let reason = match self.status {
            Trial => "trial period ended",
            Suspended => "grace period elapsed without payment",
            _ if self.auto_renew => "automatic renewal not received within grace period",
            _ => "subscription period ended without renewal",
        };

        let mut next = self.clone();
        next.close_suspension(ctx.now);
        next.status = Expired;
        next.auto_renew = false;
        next.grace_period_end = None;

        let events = vec![DomainEvent::SubscriptionExpired {
            subscription_id: self.id,
            tenant_id: self.tenant_id,
            occurred_at: ctx.now,
        }];
        Ok(self.finish(
            next,
            SubscriptionOperation::Expire,
            reason.to_string(),
            None,
            events,
            ctx,
        ))
    }

    /// Turn automatic renewal on or off
    pub fn set_auto_renew(&self, enabled: bool, ctx: &TransitionContext) -> BillingResult<Transition> {
        self.require(&[Trial, Active, Suspended], SubscriptionOperation::SetAutoRenew)?;

        let mut next = self.clone();
        next.auto_renew = enabled;
        let reason = if enabled {
            "auto-renew enabled"
        } else {
            "auto-renew disabled"
        };
        Ok(self.finish(
            next,
            SubscriptionOperation::SetAutoRenew,
            reason.to_string(),
            None,
            Vec::new(),
            ctx,
        ))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require(
        &self,
        allowed: &[SubscriptionStatus],
        operation: SubscriptionOperation,
    ) -> BillingResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(BillingError::InvalidTransition {
                status: self.status,
                operation,
            })
        }
    }

    fn close_suspension(&mut self, now: DateTime<Utc>) {
        if let Some(at) = self.suspended_at.take() {
            self.suspended_seconds += (now - at).num_seconds().max(0);
        }
    }

    fn completed_payment(&self, request: &PaymentRequest, now: DateTime<Utc>) -> Payment {
        Payment {
            id: PaymentId::new(),
            subscription_id: self.id,
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            status: PaymentStatus::Completed,
            transaction_id: request.transaction_id.clone(),
            paid_at: now,
        }
    }

    fn payment_event(&self, payment: &Payment) -> DomainEvent {
        DomainEvent::PaymentCompleted {
            payment_id: payment.id,
            subscription_id: self.id,
            tenant_id: self.tenant_id,
            amount_minor: payment.amount_minor,
            currency: payment.currency.clone(),
            occurred_at: payment.paid_at,
        }
    }

    fn finish(
        &self,
        mut next: Self,
        operation: SubscriptionOperation,
        reason: String,
        payment: Option<Payment>,
        events: Vec<DomainEvent>,
        ctx: &TransitionContext,
    ) -> Transition {
        next.updated_at = ctx.now;
        let history = SubscriptionHistoryEntry {
            subscription_id: self.id,
            old_status: Some(self.status),
            new_status: next.status,
            operation: Some(operation),
            reason,
            actor: ctx.actor.clone(),
            occurred_at: ctx.now,
        };
        Transition {
            subscription: next,
            history,
            payment,
            usage_limits: Vec::new(),
            events,
        }
    }

    fn to_update(&self) -> SubscriptionUpdate {
        SubscriptionUpdate {
            plan_id: self.plan_id.0,
            status: self.status.as_str().to_string(),
            start_date: self.start_date,
            end_date: self.end_date,
            next_billing_date: self.next_billing_date,
            auto_renew: self.auto_renew,
            grace_period_end: self.grace_period_end,
            suspended_at: self.suspended_at,
            suspended_seconds: self.suspended_seconds,
            last_notified_threshold: self
                .last_notified_threshold
                .and_then(|days| i32::try_from(days).ok()),
            cancel_reason: self.cancel_reason.clone(),
            updated_at: self.updated_at,
        }
    }
}

fn advance_cycle(plan: &Plan, from: DateTime<Utc>) -> BillingResult<DateTime<Utc>> {
    plan.billing_cycle
        .advance(from)
        .ok_or_else(|| BillingError::Internal(format!("billing cycle overflows from {from}")))
}
