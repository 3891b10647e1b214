//! Billing configuration

use std::time::Duration as StdDuration;

use chrono::Duration;

/// Subscription policy and sweeper configuration
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Length of a new trial
    pub trial_period: Duration,
    /// Window after suspension during which the subscription can be reactivated
    pub grace_period: Duration,
    /// How long before the next billing date a manual renewal is accepted
    pub renewal_window: Duration,
    /// Days-before-end at which a warning is sent, largest first
    pub expiration_warning_days: Vec<u32>,
    /// Sweeper tick interval
    pub sweep_interval: StdDuration,
    /// Re-read attempts when a sweep write loses a version race
    pub max_conflict_retries: u32,
    /// Attempts for a usage increment before giving up on a conflict
    pub max_increment_retries: u32,
    /// How long a loaded plan stays cached
    pub plan_cache_ttl: StdDuration,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            trial_period: Duration::days(14),
            grace_period: Duration::days(7),
            renewal_window: Duration::zero(),
            expiration_warning_days: vec![7, 3, 1],
            sweep_interval: StdDuration::from_secs(3600),
            max_conflict_retries: 3,
            max_increment_retries: 5,
            plan_cache_ttl: StdDuration::from_secs(60),
        }
    }
}

impl BillingConfig {
    /// Create a config with default policy values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the trial length in days
    pub fn with_trial_days(mut self, days: i64) -> Self {
        self.trial_period = Duration::days(days);
        self
    }

    /// Set the grace period in days
    pub fn with_grace_period_days(mut self, days: i64) -> Self {
        self.grace_period = Duration::days(days);
        self
    }

    /// Set the renewal window in days
    pub fn with_renewal_window_days(mut self, days: i64) -> Self {
        self.renewal_window = Duration::days(days);
        self
    }

    /// Set the expiration warning thresholds (any order, duplicates dropped)
    pub fn with_expiration_warning_days(mut self, mut days: Vec<u32>) -> Self {
        days.sort_unstable_by(|a, b| b.cmp(a));
        days.dedup();
        self.expiration_warning_days = days;
        self
    }

    /// Set the sweeper tick interval
    pub fn with_sweep_interval(mut self, interval: StdDuration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the sweep conflict retry budget
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Set the usage increment retry budget
    pub fn with_max_increment_retries(mut self, retries: u32) -> Self {
        self.max_increment_retries = retries;
        self
    }

    /// Set the plan cache TTL
    pub fn with_plan_cache_ttl(mut self, ttl: StdDuration) -> Self {
        self.plan_cache_ttl = ttl;
        self
    }

    /// Largest warning threshold, the look-ahead of the notification pass
    pub fn warning_horizon_days(&self) -> Option<u32> {
        self.expiration_warning_days.first().copied()
    }

    /// Check the policy values are usable
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.trial_period <= Duration::zero() {
            problems.push("trial period must be positive".to_string());
        }
        if self.grace_period <= Duration::zero() {
            problems.push("grace period must be positive".to_string());
        }
        if self.renewal_window < Duration::zero() {
            problems.push("renewal window must not be negative".to_string());
        }
        if self.expiration_warning_days.contains(&0) {
            problems.push("expiration warning thresholds must be at least one day".to_string());
        }
        if self.sweep_interval.is_zero() {
            problems.push("sweep interval must be positive".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
