//! Feature entitlement and usage tracking

use std::sync::Arc;

use hseguard_db::{CreateFeatureUsage, FeatureUsageRow, RepositorySet};
use hseguard_types::{
    FeatureCode, FeatureKind, FeatureLimitInfo, FeatureUsage, ParseError, Plan, ResetPeriod,
    TenantId, UsageLimit,
};
use tracing::instrument;

use crate::catalog::PlanCatalog;
use crate::clock::Clock;
use crate::error::{BillingError, BillingResult};
use crate::subscription::Subscription;

/// Outcome of one periodic usage reset pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageResetReport {
    /// Counters returned to zero
    pub reset: usize,
    /// Counters that could not be reset, with the reason
    pub failed: Vec<(TenantId, String, String)>,
}

/// Convert a stored usage counter into the domain type
pub(crate) fn usage_from_row(row: FeatureUsageRow) -> Result<FeatureUsage, ParseError> {
    Ok(FeatureUsage {
        tenant_id: TenantId(row.tenant_id),
        feature_code: FeatureCode::new(row.feature_code),
        current_usage: row.current_usage,
        usage_limit: UsageLimit::from_option(row.usage_limit),
        reset_period: row.reset_period.parse()?,
        next_reset_date: row.next_reset_date,
        version: row.version,
    })
}

/// What the tenant's current plan says about one feature
enum Entitlement {
    /// No trial or active subscription
    NoSubscription(&'static str),
    /// Plan does not grant the feature
    NotGranted(Arc<Plan>),
    /// Boolean feature granted
    Granted,
    /// Metered feature with its plan cap and reset cadence
    Metered {
        limit: UsageLimit,
        reset_period: ResetPeriod,
    },
}

/// Feature usage tracker
#[derive(Clone)]
pub struct FeatureUsageTracker {
    repos: RepositorySet,
    catalog: PlanCatalog,
    clock: Arc<dyn Clock>,
    max_increment_retries: u32,
}

impl FeatureUsageTracker {
    /// Create a tracker sharing the service's plan catalog
    pub fn new(
        repos: RepositorySet,
        catalog: PlanCatalog,
        clock: Arc<dyn Clock>,
        max_increment_retries: u32,
    ) -> Self {
        Self {
            repos,
            catalog,
            clock,
            max_increment_retries,
        }
    }

    /// Check if the tenant may use a feature right now
    pub async fn has_access_to_feature(&self, tenant_id: TenantId, code: &str) -> BillingResult<bool> {
        Ok(self.get_feature_limit(tenant_id, code).await?.is_available)
    }

    /// Usage, cap and availability of one feature
    pub async fn get_feature_limit(
        &self,
        tenant_id: TenantId,
        code: &str,
    ) -> BillingResult<FeatureLimitInfo> {
        let feature_code = parse_code(code)?;

        let unavailable = |message: String| FeatureLimitInfo {
            feature_code: feature_code.clone(),
            current_usage: 0,
            limit: None,
            reset_period: ResetPeriod::None,
            next_reset_date: None,
            is_available: false,
            message: Some(message),
        };

        match self.entitlement(tenant_id, &feature_code).await? {
            Entitlement::NoSubscription(why) => Ok(unavailable(why.to_string())),
            Entitlement::NotGranted(plan) => Ok(unavailable(format!(
                "Feature '{feature_code}' is not included in the {} plan",
                plan.name
            ))),
            Entitlement::Granted => Ok(FeatureLimitInfo {
                feature_code,
                current_usage: 0,
                limit: Some(UsageLimit::Unlimited),
                reset_period: ResetPeriod::None,
                next_reset_date: None,
                is_available: true,
                message: None,
            }),
            Entitlement::Metered { limit, reset_period } => {
                let usage = self.find_usage(tenant_id, &feature_code).await?;
                let (current_usage, limit, reset_period, next_reset_date) = match &usage {
                    Some(u) => (u.current_usage, u.usage_limit, u.reset_period, u.next_reset_date),
                    None => (0, limit, reset_period, None),
                };
                let is_available = limit.has_headroom(current_usage);

                Ok(FeatureLimitInfo {
                    message: (!is_available).then(|| match next_reset_date {
                        Some(at) => format!(
                            "Usage limit of {limit} reached for '{feature_code}', resets {}",
                            at.format("%Y-%m-%d")
                        ),
                        None => format!("Usage limit of {limit} reached for '{feature_code}'"),
                    }),
                    feature_code,
                    current_usage,
                    limit: Some(limit),
                    reset_period,
                    next_reset_date,
                    is_available,
                })
            }
        }
    }

    /// Set a counter to an absolute value
    #[instrument(skip(self), fields(tenant_id = %tenant_id, feature = code))]
    pub async fn update_feature_usage(
        &self,
        tenant_id: TenantId,
        code: &str,
        new_usage: i64,
    ) -> BillingResult<FeatureUsage> {
        let feature_code = parse_code(code)?;
        let (limit, reset_period) = self.metered(tenant_id, &feature_code).await?;
        let existing = self.find_usage(tenant_id, &feature_code).await?;
        self.write_usage(tenant_id, &feature_code, limit, reset_period, existing, new_usage)
            .await
    }

    /// Add `delta` to a counter, re-reading on a version race
    #[instrument(skip(self), fields(tenant_id = %tenant_id, feature = code))]
    pub async fn increment_feature_usage(
        &self,
        tenant_id: TenantId,
        code: &str,
        delta: i64,
    ) -> BillingResult<FeatureUsage> {
        let feature_code = parse_code(code)?;
        let (limit, reset_period) = self.metered(tenant_id, &feature_code).await?;

        let mut attempt = 0;
        loop {
            let existing = self.find_usage(tenant_id, &feature_code).await?;
            let current = existing.as_ref().map_or(0, |u| u.current_usage);
            let new_usage = current.checked_add(delta).ok_or_else(|| {
                BillingError::invalid(format!("usage of '{feature_code}' overflows"))
            })?;

            match self
                .write_usage(tenant_id, &feature_code, limit, reset_period, existing, new_usage)
                .await
            {
                Err(e) if e.is_conflict() && attempt < self.max_increment_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, "Usage counter changed concurrently, retrying");
                }
                other => return other,
            }
        }
    }

    /// Return every due periodic counter to zero and advance its reset date
    /// by one period
    #[instrument(skip(self))]
    pub async fn reset_periodic_usages(&self) -> BillingResult<UsageResetReport> {
        let now = self.clock.now();
        let due = self.repos.usage.find_due_for_reset(now).await?;
        let mut report = UsageResetReport::default();

        for row in due {
            let tenant_id = TenantId(row.tenant_id);
            let code = row.feature_code.clone();

            let result = async {
                let usage = usage_from_row(row)?;
                let Some(prior) = usage.next_reset_date.filter(|_| usage.is_reset_due(now)) else {
                    return Ok(false);
                };
                let next = usage.reset_period.advance(prior).ok_or_else(|| {
                    BillingError::Internal(format!("reset date overflows from {prior}"))
                })?;
                self.repos
                    .usage
                    .reset(tenant_id.0, &code, usage.version, next, now)
                    .await?;
                Ok::<_, BillingError>(true)
            }
            .await;

            match result {
                Ok(true) => {
                    report.reset += 1;
                    metrics::counter!("feature_usage_resets_total").increment(1);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant_id, feature = %code, error = %e, "Usage reset failed");
                    report.failed.push((tenant_id, code, e.to_string()));
                }
            }
        }

        tracing::info!(reset = report.reset, failed = report.failed.len(), "Periodic usage reset complete");
        Ok(report)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn entitlement(
        &self,
        tenant_id: TenantId,
        code: &FeatureCode,
    ) -> BillingResult<Entitlement> {
        let Some(row) = self
            .repos
            .subscriptions
            .find_current_by_tenant(tenant_id.0)
            .await?
        else {
            return Ok(Entitlement::NoSubscription("No active subscription"));
        };

        let subscription = Subscription::try_from(row)?;
        if !subscription.status().is_entitled() {
            return Ok(Entitlement::NoSubscription("Subscription is suspended"));
        }

        let plan = self.catalog.get(subscription.plan_id()).await?;
        let entitlement = match plan.feature(code.as_str()) {
            Some(f) if f.kind == FeatureKind::Limit => Entitlement::Metered {
                limit: UsageLimit::from_option(f.limit),
                reset_period: f.reset_period,
            },
            Some(f) if f.enabled => Entitlement::Granted,
            _ => Entitlement::NotGranted(plan),
        };
        Ok(entitlement)
    }

    async fn metered(
        &self,
        tenant_id: TenantId,
        code: &FeatureCode,
    ) -> BillingResult<(UsageLimit, ResetPeriod)> {
        match self.entitlement(tenant_id, code).await? {
            Entitlement::Metered { limit, reset_period } => Ok((limit, reset_period)),
            Entitlement::Granted => Err(BillingError::invalid(format!(
                "feature '{code}' is not metered"
            ))),
            Entitlement::NoSubscription(_) | Entitlement::NotGranted(_) => {
                Err(BillingError::FeatureNotAvailable(code.to_string()))
            }
        }
    }

    async fn find_usage(
        &self,
        tenant_id: TenantId,
        code: &FeatureCode,
    ) -> BillingResult<Option<FeatureUsage>> {
        self.repos
            .usage
            .find(tenant_id.0, code.as_str())
            .await?
            .map(usage_from_row)
            .transpose()
            .map_err(Into::into)
    }

    async fn write_usage(
        &self,
        tenant_id: TenantId,
        code: &FeatureCode,
        plan_limit: UsageLimit,
        plan_reset: ResetPeriod,
        existing: Option<FeatureUsage>,
        new_usage: i64,
    ) -> BillingResult<FeatureUsage> {
        if new_usage < 0 {
            return Err(BillingError::invalid(format!(
                "usage of '{code}' cannot be negative"
            )));
        }

        let limit = existing.as_ref().map_or(plan_limit, |u| u.usage_limit);
        if let UsageLimit::Limited(cap) = limit {
            if new_usage > cap {
                return Err(BillingError::UsageLimitExceeded {
                    feature: code.to_string(),
                    requested: new_usage,
                    limit: cap,
                });
            }
        }

        let now = self.clock.now();
        let row = match existing {
            Some(usage) => {
                self.repos
                    .usage
                    .update_usage(tenant_id.0, code.as_str(), usage.version, new_usage, now)
                    .await?
            }
            None => {
                self.repos
                    .usage
                    .insert(CreateFeatureUsage {
                        tenant_id: tenant_id.0,
                        feature_code: code.as_str().to_string(),
                        current_usage: new_usage,
                        usage_limit: plan_limit.as_option(),
                        reset_period: plan_reset.as_str().to_string(),
                        next_reset_date: plan_reset.advance(now),
                        created_at: now,
                    })
                    .await?
            }
        };

        tracing::debug!(usage = new_usage, %limit, "Feature usage updated");
        Ok(usage_from_row(row)?)
    }
}

impl std::fmt::Debug for FeatureUsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureUsageTracker")
            .field("max_increment_retries", &self.max_increment_retries)
            .finish_non_exhaustive()
    }
}

fn parse_code(code: &str) -> BillingResult<FeatureCode> {
    FeatureCode::parse(code).map_err(|e| BillingError::invalid(e.to_string()))
}
