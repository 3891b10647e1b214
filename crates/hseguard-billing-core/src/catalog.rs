//! Plan lookups with caching

use std::sync::Arc;
use std::time::Duration;

use hseguard_db::{PlanFeatureRow, PlanRecord, PlanRepository};
use hseguard_types::{FeatureCode, ParseError, Plan, PlanFeature, PlanId};
use moka::future::Cache;

use crate::error::{BillingError, BillingResult};

/// Plan catalog with caching
#[derive(Clone)]
pub struct PlanCatalog {
    repo: Arc<dyn PlanRepository>,
    /// Cache of plan_id -> plan with features
    cache: Cache<PlanId, Arc<Plan>>,
}

impl PlanCatalog {
    /// Create a catalog caching plans for `ttl`
    pub fn new(repo: Arc<dyn PlanRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(1_000)
                .build(),
        }
    }

    /// Get a plan with its features
    pub async fn get(&self, plan_id: PlanId) -> BillingResult<Arc<Plan>> {
        if let Some(plan) = self.cache.get(&plan_id).await {
            return Ok(plan);
        }

        let record = self
            .repo
            .find_by_id(plan_id.0)
            .await?
            .ok_or(BillingError::PlanNotFound(plan_id))?;

        let plan = Arc::new(plan_from_record(record)?);
        self.cache.insert(plan_id, Arc::clone(&plan)).await;

        Ok(plan)
    }

    /// Drop a cached plan after it was edited
    pub async fn invalidate(&self, plan_id: PlanId) {
        self.cache.invalidate(&plan_id).await;
    }
}

impl std::fmt::Debug for PlanCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCatalog")
            .field("cached", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

/// Convert stored plan rows into the domain plan
pub fn plan_from_record(record: PlanRecord) -> Result<Plan, ParseError> {
    let PlanRecord { plan, mut features } = record;
    features.sort_by_key(|f| f.position);

    Ok(Plan {
        id: PlanId(plan.id),
        name: plan.name,
        plan_type: plan.plan_type.parse()?,
        billing_cycle: plan.billing_cycle.parse()?,
        price_minor: plan.price_minor,
        currency: plan.currency,
        is_active: plan.is_active,
        features: features
            .into_iter()
            .map(feature_from_row)
            .collect::<Result<_, _>>()?,
    })
}

fn feature_from_row(row: PlanFeatureRow) -> Result<PlanFeature, ParseError> {
    Ok(PlanFeature {
        code: FeatureCode::new(row.code),
        display_name: row.display_name,
        kind: row.kind.parse()?,
        enabled: row.enabled,
        limit: row.usage_limit,
        reset_period: row.reset_period.parse()?,
    })
}
