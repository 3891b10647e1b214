//! PostgreSQL plan repository implementation

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::{PlanFeatureRow, PlanRecord, PlanRow};
use crate::repo::{CreatePlan, PlanRepository};

const PLAN_COLUMNS: &str =
    "id, name, plan_type, billing_cycle, price_minor, currency, is_active, created_at";

const FEATURE_COLUMNS: &str =
    "plan_id, position, code, display_name, kind, enabled, usage_limit, reset_period";

/// PostgreSQL plan repository
#[derive(Clone)]
pub struct PgPlanRepository {
    pool: PgPool,
}

impl PgPlanRepository {
    /// Create a new plan repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn features_for(&self, plan_ids: &[Uuid]) -> DbResult<Vec<PlanFeatureRow>> {
        let features = sqlx::query_as::<_, PlanFeatureRow>(&format!(
            "SELECT {FEATURE_COLUMNS} FROM plan_features WHERE plan_id = ANY($1) ORDER BY plan_id, position"
        ))
        .bind(plan_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(features)
    }
}

#[async_trait]
impl PlanRepository for PgPlanRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PlanRecord>> {
        let plan = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(plan) = plan else {
            return Ok(None);
        };

        let features = self.features_for(&[plan.id]).await?;
        Ok(Some(PlanRecord { plan, features }))
    }

    async fn list_active(&self) -> DbResult<Vec<PlanRecord>> {
        let plans = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE is_active ORDER BY price_minor, name"
        ))
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = plans.iter().map(|p| p.id).collect();
        let mut by_plan: HashMap<Uuid, Vec<PlanFeatureRow>> = HashMap::new();
        for feature in self.features_for(&ids).await? {
            by_plan.entry(feature.plan_id).or_default().push(feature);
        }

        Ok(plans
            .into_iter()
            .map(|plan| {
                let features = by_plan.remove(&plan.id).unwrap_or_default();
                PlanRecord { plan, features }
            })
            .collect())
    }

    async fn create(&self, plan: CreatePlan) -> DbResult<PlanRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            INSERT INTO plans (id, name, plan_type, billing_cycle, price_minor, currency)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(plan.id)
        .bind(&plan.name)
        .bind(&plan.plan_type)
        .bind(&plan.billing_cycle)
        .bind(plan.price_minor)
        .bind(&plan.currency)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DbError::from_insert(e, "plan"))?;

        let mut features = Vec::with_capacity(plan.features.len());
        for (position, feature) in plan.features.into_iter().enumerate() {
            let inserted = sqlx::query_as::<_, PlanFeatureRow>(&format!(
                r#"
                INSERT INTO plan_features
                    (plan_id, position, code, display_name, kind, enabled, usage_limit, reset_period)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {FEATURE_COLUMNS}
                "#
            ))
            .bind(row.id)
            .bind(position as i32)
            .bind(&feature.code)
            .bind(&feature.display_name)
            .bind(&feature.kind)
            .bind(feature.enabled)
            .bind(feature.usage_limit)
            .bind(&feature.reset_period)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| DbError::from_insert(e, "plan feature"))?;
            features.push(inserted);
        }

        tx.commit().await?;

        Ok(PlanRecord { plan: row, features })
    }
}
