//! Service wiring over the mock repositories

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hseguard_billing_core::{
    BillingConfig, EventPublisher, ExpirationSweeper, FeatureUsageTracker, ManualClock,
    NotificationError, NotificationKind, NotificationSender, PaymentRequest, SubscriptionService,
};
use hseguard_db::{
    CreatePlan, CreatePlanFeature, CreateTenant, PlanRepository, RepositorySet, TenantRepository,
};
use hseguard_types::{BillingCycle, DomainEvent, PlanFeature, PlanId, PlanType, TenantId};

use super::mock_repos::{
    MockFeatureUsageRepository, MockPlanRepository, MockSubscriptionRepository,
    MockTenantRepository,
};

/// One notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone)]
pub struct SentNotification {
    pub tenant_id: TenantId,
    pub subject: String,
    pub kind: NotificationKind,
}

/// Notifier that records deliveries and can be told to fail
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn with_subject(&self, subject: &str) -> usize {
        self.sent().iter().filter(|n| n.subject == subject).count()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_system_notification(
        &self,
        tenant_id: TenantId,
        subject: &str,
        _message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError("mail relay unavailable".into()));
        }
        self.sent.lock().unwrap().push(SentNotification {
            tenant_id,
            subject: subject.to_string(),
            kind,
        });
        Ok(())
    }
}

/// Publisher that keeps every event
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingPublisher {
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|e| e.iter().map(DomainEvent::name).collect())
            .unwrap_or_default()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: DomainEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Fully wired billing core with a controllable clock
pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub tenants: MockTenantRepository,
    pub plans: MockPlanRepository,
    pub subscriptions: MockSubscriptionRepository,
    pub usage: MockFeatureUsageRepository,
    pub notifier: Arc<RecordingNotifier>,
    pub events: Arc<RecordingPublisher>,
    pub service: SubscriptionService,
    pub tracker: FeatureUsageTracker,
    pub sweeper: ExpirationSweeper,
}

/// Fixed starting instant for every harness
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
}

/// A valid payment
pub fn payment(reference: &str) -> PaymentRequest {
    PaymentRequest::new(9_900, "EUR", reference)
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(BillingConfig::default())
    }

    pub fn with_config(config: BillingConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let tenants = MockTenantRepository::new();
        let plans = MockPlanRepository::new();
        let usage = MockFeatureUsageRepository::new();
        let subscriptions = MockSubscriptionRepository::new(usage.clone());
        let notifier = Arc::new(RecordingNotifier::default());
        let events = Arc::new(RecordingPublisher::default());

        let repos = RepositorySet {
            tenants: Arc::new(tenants.clone()),
            plans: Arc::new(plans.clone()),
            subscriptions: Arc::new(subscriptions.clone()),
            usage: Arc::new(usage.clone()),
        };

        let max_increment_retries = config.max_increment_retries;
        let service = SubscriptionService::new(
            repos.clone(),
            config,
            clock.clone(),
            notifier.clone(),
            events.clone(),
        );
        let tracker = FeatureUsageTracker::new(
            repos,
            service.catalog().clone(),
            clock.clone(),
            max_increment_retries,
        );
        let sweeper = ExpirationSweeper::new(service.clone(), tracker.clone());

        Self {
            clock,
            tenants,
            plans,
            subscriptions,
            usage,
            notifier,
            events,
            service,
            tracker,
            sweeper,
        }
    }

    pub async fn seed_tenant(&self, name: &str) -> TenantId {
        let row = self
            .tenants
            .create(CreateTenant {
                id: uuid::Uuid::new_v4(),
                name: name.to_string(),
                created_by: "test".to_string(),
                created_at: start_time(),
            })
            .await
            .unwrap();
        TenantId(row.id)
    }

    pub async fn seed_plan(&self, plan_type: PlanType, billing_cycle: BillingCycle) -> PlanId {
        self.seed_plan_with(plan_type, billing_cycle, plan_type.default_features())
            .await
    }

    pub async fn seed_plan_with(
        &self,
        plan_type: PlanType,
        billing_cycle: BillingCycle,
        features: Vec<PlanFeature>,
    ) -> PlanId {
        let id = PlanId::new();
        let features = features
            .into_iter()
            .map(|f| CreatePlanFeature {
                code: f.code.as_str().to_string(),
                display_name: f.display_name,
                kind: f.kind.as_str().to_string(),
                enabled: f.enabled,
                usage_limit: f.limit,
                reset_period: f.reset_period.as_str().to_string(),
            })
            .collect();
        self.plans
            .create(CreatePlan {
                id: id.0,
                name: plan_type.to_string(),
                plan_type: plan_type.as_str().to_string(),
                billing_cycle: billing_cycle.as_str().to_string(),
                price_minor: 9_900,
                currency: "EUR".to_string(),
                features,
            })
            .await
            .unwrap();
        id
    }

    /// Seed a tenant on an active monthly plan of `plan_type`
    pub async fn active_tenant(
        &self,
        plan_type: PlanType,
    ) -> (TenantId, hseguard_billing_core::Subscription) {
        let tenant_id = self.seed_tenant("Acme Safety").await;
        let plan_id = self.seed_plan(plan_type, BillingCycle::Monthly).await;
        let trial = self
            .service
            .create_trial_subscription(tenant_id, plan_id, "admin@acme")
            .await
            .unwrap();
        let active = self
            .service
            .activate_subscription(trial.id(), payment("txn-activate"), "admin@acme")
            .await
            .unwrap();
        (tenant_id, active)
    }
}
