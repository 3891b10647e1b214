//! Feature usage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FeatureCode, ResetPeriod, TenantId, UsageLimit};

/// Live counter for one metered feature of one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureUsage {
    /// Tenant consuming the feature
    pub tenant_id: TenantId,
    /// Feature being metered
    pub feature_code: FeatureCode,
    /// Units consumed in the current period
    pub current_usage: i64,
    /// Cap snapshotted from the plan
    pub usage_limit: UsageLimit,
    /// Reset cadence
    pub reset_period: ResetPeriod,
    /// Next time the counter returns to zero
    pub next_reset_date: Option<DateTime<Utc>>,
    /// Optimistic concurrency version
    pub version: i64,
}

impl FeatureUsage {
    /// Whether one more unit may be consumed
    pub fn has_headroom(&self) -> bool {
        self.usage_limit.has_headroom(self.current_usage)
    }

    /// Whether the counter is due for a periodic reset at `now`
    pub fn is_reset_due(&self, now: DateTime<Utc>) -> bool {
        self.reset_period.is_periodic() && self.next_reset_date.is_some_and(|at| at <= now)
    }
}

/// Read-only snapshot answering "can this tenant use this feature?"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureLimitInfo {
    /// Feature the snapshot describes
    pub feature_code: FeatureCode,
    /// Units consumed in the current period
    pub current_usage: i64,
    /// Cap (`None` when the tenant is not entitled at all)
    pub limit: Option<UsageLimit>,
    /// Reset cadence
    pub reset_period: ResetPeriod,
    /// Next reset, if periodic
    pub next_reset_date: Option<DateTime<Utc>>,
    /// Mirrors `has_access_to_feature`
    pub is_available: bool,
    /// Reason when unavailable
    pub message: Option<String>,
}

impl FeatureLimitInfo {
    /// Remaining units, `None` when unlimited or not entitled
    pub fn remaining(&self) -> Option<i64> {
        match self.limit {
            Some(UsageLimit::Limited(limit)) => Some((limit - self.current_usage).max(0)),
            _ => None,
        }
    }
}
