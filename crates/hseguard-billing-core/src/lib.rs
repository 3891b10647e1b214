//! HSEGuard Billing Core - Subscription business logic
//!
//! Subscription lifecycle, feature entitlement and periodic sweeping for
//! HSEGuard tenants.
//!
//! Transitions are pure functions on [`Subscription`] that return a
//! [`Transition`]: the new state, one history entry, an optional payment and
//! the events to publish. [`SubscriptionService`] loads the aggregate,
//! applies a transition, persists it in one database transaction and
//! publishes the events once the commit succeeded.
//!
//! # Example
//!
//! ```rust,ignore
//! use hseguard_billing_core::{BillingConfig, PaymentRequest, SubscriptionService, SystemClock};
//! use hseguard_db::Repositories;
//!
//! let service = SubscriptionService::new(repos.into(), BillingConfig::default(), clock, notifier, events);
//!
//! let trial = service.create_trial_subscription(tenant_id, plan_id, "onboarding").await?;
//! let active = service
//!     .activate_subscription(trial.id(), PaymentRequest::new(9900, "USD", "txn_123"), "billing")
//!     .await?;
//! ```

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod payment;
pub mod subscription;
pub mod sweeper;
pub mod usage;

pub use catalog::PlanCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BillingConfig;
pub use error::{BillingError, BillingResult};
pub use lifecycle::SubscriptionService;
pub use notify::{
    ChannelEventPublisher, EventPublisher, EventReceiver, NotificationError, NotificationKind,
    NotificationSender, TracingNotificationSender,
};
pub use payment::PaymentRequest;
pub use subscription::{LimitSnapshot, Subscription, Transition, TransitionContext};
pub use sweeper::{CycleReport, ExpirationSweeper, NotificationReport, SweepReport, SWEEPER_ACTOR};
pub use usage::{FeatureUsageTracker, UsageResetReport};

// Re-export the domain types callers need alongside the services
pub use hseguard_types::{
    DomainEvent, FeatureLimitInfo, Plan, SubscriptionStatus, SubscriptionSummary, TenantId,
};
