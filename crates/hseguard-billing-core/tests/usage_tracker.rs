//! Feature entitlement and usage counter tests

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::TestHarness;
use hseguard_billing_core::{BillingConfig, BillingError};
use hseguard_types::{BillingCycle, PlanType, ResetPeriod, TenantId, UsageLimit};

#[tokio::test]
async fn test_limit_is_inclusive_and_enforced() {
    let h = TestHarness::new();
    let (tenant_id, _) = h.active_tenant(PlanType::Professional).await;

    let usage = h
        .tracker
        .update_feature_usage(tenant_id, "reports.monthly", 50)
        .await
        .unwrap();
    assert_eq!(usage.current_usage, 50);
    assert_eq!(usage.usage_limit, UsageLimit::Limited(50));

    let err = h
        .tracker
        .increment_feature_usage(tenant_id, "reports.monthly", 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BillingError::UsageLimitExceeded { requested: 51, limit: 50, .. }
    ));
    assert_eq!(h.usage.get(tenant_id.0, "reports.monthly").unwrap().current_usage, 50);

    let info = h
        .tracker
        .get_feature_limit(tenant_id, "reports.monthly")
        .await
        .unwrap();
    assert!(!info.is_available);
    assert_eq!(info.remaining(), Some(0));
    assert_eq!(
        info.message.as_deref(),
        Some("Usage limit of 50 reached for 'reports.monthly', resets 2026-02-15")
    );
    assert!(!h
        .tracker
        .has_access_to_feature(tenant_id, "reports.monthly")
        .await
        .unwrap());

    h.tracker
        .update_feature_usage(tenant_id, "users", 25)
        .await
        .unwrap();
    let users = h.tracker.get_feature_limit(tenant_id, "users").await.unwrap();
    assert_eq!(
        users.message.as_deref(),
        Some("Usage limit of 25 reached for 'users'")
    );
}

#[tokio::test]
async fn test_first_increment_creates_counter() {
    let h = TestHarness::new();
    let (tenant_id, _) = h.active_tenant(PlanType::Basic).await;

    let info = h.tracker.get_feature_limit(tenant_id, "inspections").await.unwrap();
    assert_eq!(info.current_usage, 0);
    assert_eq!(info.limit, Some(UsageLimit::Limited(50)));
    assert!(info.is_available);

    let usage = h
        .tracker
        .increment_feature_usage(tenant_id, "inspections", 3)
        .await
        .unwrap();
    assert_eq!(usage.current_usage, 3);
    assert_eq!(usage.reset_period, ResetPeriod::Monthly);
    assert_eq!(
        usage.next_reset_date,
        Some(Utc.with_ymd_and_hms(2026, 2, 15, 9, 0, 0).unwrap())
    );

    let usage = h
        .tracker
        .increment_feature_usage(tenant_id, "inspections", 2)
        .await
        .unwrap();
    assert_eq!(usage.current_usage, 5);
    assert_eq!(usage.version, 2);
}

#[tokio::test]
async fn test_periodic_reset_advances_one_period() {
    let h = TestHarness::new();
    let (tenant_id, _) = h.active_tenant(PlanType::Professional).await;

    h.tracker
        .update_feature_usage(tenant_id, "reports.monthly", 42)
        .await
        .unwrap();
    h.tracker
        .update_feature_usage(tenant_id, "users", 7)
        .await
        .unwrap();

    // Not due yet
    h.clock.set(Utc.with_ymd_and_hms(2026, 2, 15, 8, 59, 59).unwrap());
    let report = h.tracker.reset_periodic_usages().await.unwrap();
    assert_eq!(report.reset, 0);

    h.clock.set(Utc.with_ymd_and_hms(2026, 2, 15, 9, 0, 0).unwrap());
    let report = h.tracker.reset_periodic_usages().await.unwrap();
    assert_eq!(report.reset, 1);
    assert!(report.failed.is_empty());

    let reports = h.usage.get(tenant_id.0, "reports.monthly").unwrap();
    assert_eq!(reports.current_usage, 0);
    assert_eq!(
        reports.next_reset_date,
        Some(Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap())
    );

    let users = h.usage.get(tenant_id.0, "users").unwrap();
    assert_eq!(users.current_usage, 7);
    assert_eq!(users.next_reset_date, None);

    // Running again in the same instant is a no-op
    let report = h.tracker.reset_periodic_usages().await.unwrap();
    assert_eq!(report.reset, 0);
}

#[tokio::test]
async fn test_late_reset_keeps_original_cadence() {
    let h = TestHarness::new();
    let (tenant_id, _) = h.active_tenant(PlanType::Basic).await;
    h.tracker
        .increment_feature_usage(tenant_id, "inspections", 9)
        .await
        .unwrap();

    // Sweeper was down for a few days
    h.clock.set(Utc.with_ymd_and_hms(2026, 2, 19, 3, 0, 0).unwrap());
    h.tracker.reset_periodic_usages().await.unwrap();

    let row = h.usage.get(tenant_id.0, "inspections").unwrap();
    assert_eq!(row.current_usage, 0);
    assert_eq!(
        row.next_reset_date,
        Some(Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_increment_retries_lost_races() {
    let h = TestHarness::new();
    let (tenant_id, _) = h.active_tenant(PlanType::Professional).await;
    h.tracker
        .update_feature_usage(tenant_id, "inspections", 10)
        .await
        .unwrap();

    // Two concurrent +1 writers land first; no increment is lost
    h.usage.race_next_updates(2);
    let usage = h
        .tracker
        .increment_feature_usage(tenant_id, "inspections", 1)
        .await
        .unwrap();
    assert_eq!(usage.current_usage, 13);
}

#[tokio::test]
async fn test_increment_gives_up_after_retry_budget() {
    let mut config = BillingConfig::default();
    config.max_increment_retries = 1;
    let h = TestHarness::with_config(config);
    let (tenant_id, _) = h.active_tenant(PlanType::Professional).await;
    h.tracker
        .update_feature_usage(tenant_id, "inspections", 10)
        .await
        .unwrap();

    h.usage.race_next_updates(5);
    let err = h
        .tracker
        .increment_feature_usage(tenant_id, "inspections", 1)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_access_follows_subscription_status() {
    let h = TestHarness::new();
    let tenant_id = h.seed_tenant("Acme Safety").await;
    let plan_id = h.seed_plan(PlanType::Basic, BillingCycle::Monthly).await;

    let info = h.tracker.get_feature_limit(tenant_id, "audits").await.unwrap();
    assert!(!info.is_available);
    assert_eq!(info.message.as_deref(), Some("No active subscription"));

    let trial = h
        .service
        .create_trial_subscription(tenant_id, plan_id, "onboarding")
        .await
        .unwrap();
    assert!(h.tracker.has_access_to_feature(tenant_id, "audits").await.unwrap());

    h.service
        .suspend_subscription(trial.id(), "verification pending", "ops")
        .await
        .unwrap();
    let info = h.tracker.get_feature_limit(tenant_id, "audits").await.unwrap();
    assert!(!info.is_available);
    assert_eq!(info.message.as_deref(), Some("Subscription is suspended"));

    let err = h
        .tracker
        .increment_feature_usage(tenant_id, "inspections", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::FeatureNotAvailable(_)));
}

#[tokio::test]
async fn test_features_outside_plan_are_denied() {
    let h = TestHarness::new();
    let (tenant_id, _) = h.active_tenant(PlanType::Basic).await;

    let info = h.tracker.get_feature_limit(tenant_id, "trainings").await.unwrap();
    assert!(!info.is_available);
    assert_eq!(info.limit, None);
    assert_eq!(
        info.message.as_deref(),
        Some("Feature 'trainings' is not included in the basic plan")
    );

    let err = h
        .tracker
        .increment_feature_usage(tenant_id, "trainings", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::FeatureNotAvailable(code) if code == "trainings"));

    let info = h.tracker.get_feature_limit(tenant_id, "audits").await.unwrap();
    assert!(info.is_available);
    assert_eq!(info.limit, Some(UsageLimit::Unlimited));
}

#[tokio::test]
async fn test_bad_usage_input_is_rejected() {
    let h = TestHarness::new();
    let (tenant_id, _) = h.active_tenant(PlanType::Basic).await;

    let err = h
        .tracker
        .update_feature_usage(tenant_id, "inspections", -1)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = h
        .tracker
        .update_feature_usage(tenant_id, "audits", 1)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = h
        .tracker
        .get_feature_limit(tenant_id, "Reports Monthly")
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = h
        .tracker
        .get_feature_limit(TenantId::new(), "")
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_expired_subscription_loses_entitlement() {
    let h = TestHarness::new();
    let (tenant_id, active) = h.active_tenant(PlanType::Basic).await;
    assert!(h.tracker.has_access_to_feature(tenant_id, "audits").await.unwrap());

    h.clock.set(active.end_date() + Duration::seconds(1));
    let report = h.sweeper.check_and_process_expired_subscriptions().await.unwrap();
    assert_eq!(report.processed, 1);

    assert!(!h.tracker.has_access_to_feature(tenant_id, "audits").await.unwrap());
    assert!(h.service.get_current_subscription(tenant_id).await.unwrap().is_none());
}
