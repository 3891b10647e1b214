//! Periodic expiration sweep
//!
//! Expires lapsed subscriptions, sends expiration warnings and resets
//! periodic usage counters. A failure on one subscription is logged and
//! reported; it never stops the rest of the batch.

use std::future::Future;
use std::time::Instant;

use chrono::Duration;
use hseguard_types::{SubscriptionId, SubscriptionStatus};
use tracing::instrument;

use crate::error::{BillingError, BillingResult};
use crate::notify::NotificationKind;
use crate::subscription::Subscription;
use crate::usage::{FeatureUsageTracker, UsageResetReport};
use crate::SubscriptionService;

/// Actor recorded in history for sweeper transitions
pub const SWEEPER_ACTOR: &str = "system:expiration-sweeper";

/// Outcome of one expiration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Candidates returned by the query
    pub examined: usize,
    /// Subscriptions moved to `Expired`
    pub processed: usize,
    /// Candidates that were no longer due after a re-read
    pub skipped: usize,
    /// Subscriptions that could not be expired, with the reason
    pub failed: Vec<(SubscriptionId, String)>,
}

/// Outcome of one expiration-warning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationReport {
    /// Warnings delivered
    pub sent: usize,
    /// Warnings that could not be delivered or recorded
    pub failed: Vec<(SubscriptionId, String)>,
}

/// Outcome of a full sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Expiration pass
    pub expirations: SweepReport,
    /// Warning pass
    pub notifications: NotificationReport,
    /// Usage reset pass
    pub usage_resets: UsageResetReport,
}

enum ExpireOutcome {
    Expired(Subscription),
    NoLongerDue,
}

/// Expiration sweeper
#[derive(Debug, Clone)]
pub struct ExpirationSweeper {
    service: SubscriptionService,
    tracker: FeatureUsageTracker,
}

impl ExpirationSweeper {
    /// Create a sweeper over the given service and tracker
    pub fn new(service: SubscriptionService, tracker: FeatureUsageTracker) -> Self {
        Self { service, tracker }
    }

    /// Expire every subscription whose period or grace period has passed
    #[instrument(skip(self))]
    pub async fn check_and_process_expired_subscriptions(&self) -> BillingResult<SweepReport> {
        let now = self.service.clock.now();
        let candidates = self
            .service
            .repos
            .subscriptions
            .find_expiration_candidates(now, now - self.service.config.grace_period)
            .await?;

        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for row in candidates {
            let id = SubscriptionId(row.id);
            let outcome = match Subscription::try_from(row) {
                Ok(sub) => self.expire_with_retry(sub).await,
                Err(e) => Err(BillingError::from(e)),
            };

            match outcome {
                Ok(ExpireOutcome::Expired(sub)) => {
                    report.processed += 1;
                    self.service
                        .notify(
                            sub.tenant_id(),
                            "Subscription expired",
                            "Your subscription has expired. Renew to restore access to your modules.",
                            NotificationKind::Alert,
                        )
                        .await;
                }
                Ok(ExpireOutcome::NoLongerDue) => report.skipped += 1,
                Err(e) => {
                    metrics::counter!("subscription_sweep_failures_total").increment(1);
                    tracing::error!(subscription_id = %id, error = %e, "Failed to expire subscription");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Expiration sweep complete"
        );
        Ok(report)
    }

    /// Warn tenants whose subscription ends within a configured threshold
    #[instrument(skip(self))]
    pub async fn send_expiration_notifications(&self) -> BillingResult<NotificationReport> {
        let config = &self.service.config;
        let Some(horizon) = config.warning_horizon_days() else {
            return Ok(NotificationReport::default());
        };

        let now = self.service.clock.now();
        let until = now + Duration::days(i64::from(horizon));
        let rows = self
            .service
            .repos
            .subscriptions
            .find_ending_between(now, until)
            .await?;

        let mut report = NotificationReport::default();
        for row in rows {
            let id = SubscriptionId(row.id);
            let sub = match Subscription::try_from(row) {
                Ok(sub) => sub,
                Err(e) => {
                    report.failed.push((id, e.to_string()));
                    continue;
                }
            };
            let Some(threshold) = sub.due_warning(now, &config.expiration_warning_days) else {
                continue;
            };

            let subject = if sub.status() == SubscriptionStatus::Trial {
                "Trial ending soon"
            } else {
                "Subscription expiring soon"
            };
            let message = format!(
                "Your subscription ends on {} ({} day(s) left).",
                sub.end_date().format("%Y-%m-%d"),
                sub.days_remaining(now)
            );

            if !self
                .service
                .notify(sub.tenant_id(), subject, &message, NotificationKind::Warning)
                .await
            {
                report.failed.push((id, "notification delivery failed".to_string()));
                continue;
            }

            // Record only after delivery so a failed send is retried next tick
            let threshold_days = i32::try_from(threshold).unwrap_or(i32::MAX);
            match self
                .service
                .repos
                .subscriptions
                .set_notified_threshold(id.0, sub.version(), threshold_days)
                .await
            {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    tracing::warn!(subscription_id = %id, error = %e, "Warning sent but not recorded");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        tracing::info!(sent = report.sent, failed = report.failed.len(), "Expiration warnings sent");
        Ok(report)
    }

    /// Reset due periodic usage counters
    pub async fn reset_periodic_usages(&self) -> BillingResult<UsageResetReport> {
        self.tracker.reset_periodic_usages().await
    }

    /// One full cycle: expire, warn, reset usage
    pub async fn run_once(&self) -> CycleReport {
        let started = Instant::now();

        let expirations = self
            .check_and_process_expired_subscriptions()
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Expiration pass failed");
                SweepReport::default()
            });
        let notifications = self.send_expiration_notifications().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Expiration warning pass failed");
            NotificationReport::default()
        });
        let usage_resets = self.reset_periodic_usages().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Usage reset pass failed");
            UsageResetReport::default()
        });

        metrics::histogram!("subscription_sweep_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        CycleReport {
            expirations,
            notifications,
            usage_resets,
        }
    }

    /// Run a cycle every `sweep_interval` until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.service.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.service.config.sweep_interval.as_secs(),
            "Expiration sweeper started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Expiration sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.run_once().await;
                }
            }
        }
    }

    async fn expire_with_retry(&self, mut current: Subscription) -> BillingResult<ExpireOutcome> {
        let mut attempt = 0;
        loop {
            let ctx = self.service.context(SWEEPER_ACTOR);
            let grace_period = self.service.config.grace_period;
            if !current.is_due_for_expiration(ctx.now, grace_period) {
                return Ok(ExpireOutcome::NoLongerDue);
            }

            let transition = current.expire(grace_period, &ctx)?;
            match self.service.persist(&current, transition).await {
                Ok(saved) => return Ok(ExpireOutcome::Expired(saved)),
                Err(e) if e.is_conflict() && attempt < self.service.config.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!(
                        subscription_id = %current.id(),
                        attempt,
                        "Subscription changed during sweep, re-reading"
                    );
                    current = self.service.load(current.id()).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
