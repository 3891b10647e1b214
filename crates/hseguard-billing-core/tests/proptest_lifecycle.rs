//! Property-based tests for subscription transitions
//!
//! These tests drive the pure aggregate through random operation sequences
//! and check the lifecycle guarantees:
//! - The period never collapses (end stays after start)
//! - Cancelled and expired subscriptions accept no further transition
//! - Every transition records exactly the status change it made
//! - Payments are recorded by activation and renewal only

use chrono::{Duration, TimeZone, Utc};
use hseguard_billing_core::{PaymentRequest, Subscription, TransitionContext};
use hseguard_types::{BillingCycle, Plan, PlanId, PlanType, TenantId};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Op {
    Activate,
    Renew,
    ChangePlan,
    Suspend,
    Cancel,
    Expire,
    SetAutoRenew(bool),
    AdvanceHours(i64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Activate),
        Just(Op::Renew),
        Just(Op::ChangePlan),
        Just(Op::Suspend),
        Just(Op::Cancel),
        Just(Op::Expire),
        any::<bool>().prop_map(Op::SetAutoRenew),
        (1i64..=2_000).prop_map(Op::AdvanceHours),
    ]
}

fn plan(plan_type: PlanType, billing_cycle: BillingCycle) -> Plan {
    Plan {
        id: PlanId::new(),
        name: plan_type.to_string(),
        plan_type,
        billing_cycle,
        price_minor: 4_900,
        currency: "EUR".to_string(),
        is_active: true,
        features: plan_type.default_features(),
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn random_operations_keep_lifecycle_invariants(ops in prop::collection::vec(arb_op(), 1..40)) {
        let plans = [
            plan(PlanType::Basic, BillingCycle::Monthly),
            plan(PlanType::Enterprise, BillingCycle::Annual),
        ];
        let payment = PaymentRequest::new(4_900, "EUR", "txn-prop");
        let mut now = Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap();

        let ctx = TransitionContext::new(now, "proptest");
        let mut sub = Subscription::start_trial(TenantId::new(), &plans[0], Duration::days(14), &ctx)
            .unwrap()
            .subscription;

        for op in ops {
            if let Op::AdvanceHours(hours) = op {
                now += Duration::hours(hours);
                continue;
            }

            let ctx = TransitionContext::new(now, "proptest");
            let current = plans.iter().find(|p| p.id == sub.plan_id()).unwrap();
            let other = plans.iter().find(|p| p.id != sub.plan_id()).unwrap();
            let before = sub.status();

            let result = match op {
                Op::Activate => sub.activate(current, &payment, &ctx),
                Op::Renew => sub.renew(current, &payment, Duration::days(3), &ctx),
                Op::ChangePlan => sub.change_plan(current, other, &[], &ctx),
                Op::Suspend => sub.suspend("card declined", Duration::days(7), &ctx),
                Op::Cancel => sub.cancel("requested", &ctx),
                Op::Expire => sub.expire(Duration::days(7), &ctx),
                Op::SetAutoRenew(enabled) => sub.set_auto_renew(enabled, &ctx),
                Op::AdvanceHours(_) => unreachable!(),
            };

            if before.is_terminal() {
                prop_assert!(result.is_err(), "{:?} succeeded on a {} subscription", op, before);
                continue;
            }

            if let Ok(transition) = result {
                prop_assert_eq!(transition.history.old_status, Some(before));
                prop_assert_eq!(transition.history.new_status, transition.subscription.status());
                prop_assert_eq!(
                    transition.payment.is_some(),
                    matches!(op, Op::Activate | Op::Renew)
                );
                prop_assert!(!transition.events.is_empty() || matches!(op, Op::SetAutoRenew(_)));
                sub = transition.subscription;
            }

            prop_assert!(sub.end_date() > sub.start_date());
            let compliance = sub.compliance_percentage(now);
            prop_assert!((0.0..=100.0).contains(&compliance));
            prop_assert!(sub.days_remaining(now) >= 0);
        }
    }

    #[test]
    fn due_warning_picks_a_configured_threshold_not_below_days_left(
        trial_days in 1i64..60,
        elapsed_hours in 0i64..1_500,
        thresholds in prop::collection::vec(1u32..30, 0..5),
    ) {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let basic = plan(PlanType::Basic, BillingCycle::Monthly);
        let ctx = TransitionContext::new(start, "proptest");
        let sub = Subscription::start_trial(TenantId::new(), &basic, Duration::days(trial_days), &ctx)
            .unwrap()
            .subscription;

        let now = start + Duration::hours(elapsed_hours);
        if let Some(threshold) = sub.due_warning(now, &thresholds) {
            prop_assert!(thresholds.contains(&threshold));
            prop_assert!(i64::from(threshold) >= sub.days_remaining(now));
            prop_assert!(sub.end_date() > now);
        }
    }
}
