//! PostgreSQL feature usage repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::FeatureUsageRow;
use crate::repo::{CreateFeatureUsage, FeatureUsageRepository};

const USAGE_COLUMNS: &str = "tenant_id, feature_code, current_usage, usage_limit, reset_period, next_reset_date, version, updated_at";

/// PostgreSQL feature usage repository
#[derive(Clone)]
pub struct PgFeatureUsageRepository {
    pool: PgPool,
}

impl PgFeatureUsageRepository {
    /// Create a new feature usage repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn stale_or_missing(
        &self,
        tenant_id: Uuid,
        feature_code: &str,
        expected_version: i64,
    ) -> DbError {
        match self.find(tenant_id, feature_code).await {
            Ok(Some(row)) => DbError::Conflict(format!(
                "usage {feature_code} for tenant {tenant_id} is at version {}, expected {expected_version}",
                row.version
            )),
            Ok(None) => DbError::NotFound,
            Err(e) => e,
        }
    }
}

#[async_trait]
impl FeatureUsageRepository for PgFeatureUsageRepository {
    async fn find(&self, tenant_id: Uuid, feature_code: &str) -> DbResult<Option<FeatureUsageRow>> {
        let usage = sqlx::query_as::<_, FeatureUsageRow>(&format!(
            "SELECT {USAGE_COLUMNS} FROM feature_usages WHERE tenant_id = $1 AND feature_code = $2"
        ))
        .bind(tenant_id)
        .bind(feature_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(usage)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> DbResult<Vec<FeatureUsageRow>> {
        let rows = sqlx::query_as::<_, FeatureUsageRow>(&format!(
            "SELECT {USAGE_COLUMNS} FROM feature_usages WHERE tenant_id = $1 ORDER BY feature_code"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert(&self, usage: CreateFeatureUsage) -> DbResult<FeatureUsageRow> {
        let row = sqlx::query_as::<_, FeatureUsageRow>(&format!(
            r#"
            INSERT INTO feature_usages (tenant_id, feature_code, current_usage, usage_limit,
                                        reset_period, next_reset_date, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USAGE_COLUMNS}
            "#
        ))
        .bind(usage.tenant_id)
        .bind(&usage.feature_code)
        .bind(usage.current_usage)
        .bind(usage.usage_limit)
        .bind(&usage.reset_period)
        .bind(usage.next_reset_date)
        .bind(usage.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, "feature usage"))?;

        Ok(row)
    }

    async fn update_usage(
        &self,
        tenant_id: Uuid,
        feature_code: &str,
        expected_version: i64,
        current_usage: i64,
        at: DateTime<Utc>,
    ) -> DbResult<FeatureUsageRow> {
        let row = sqlx::query_as::<_, FeatureUsageRow>(&format!(
            r#"
            UPDATE feature_usages
            SET current_usage = $1, updated_at = $2, version = version + 1
            WHERE tenant_id = $3 AND feature_code = $4 AND version = $5
            RETURNING {USAGE_COLUMNS}
            "#
        ))
        .bind(current_usage)
        .bind(at)
        .bind(tenant_id)
        .bind(feature_code)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row),
            None => Err(self
                .stale_or_missing(tenant_id, feature_code, expected_version)
                .await),
        }
    }

    async fn reset(
        &self,
        tenant_id: Uuid,
        feature_code: &str,
        expected_version: i64,
        next_reset_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> DbResult<FeatureUsageRow> {
        let row = sqlx::query_as::<_, FeatureUsageRow>(&format!(
            r#"
            UPDATE feature_usages
            SET current_usage = 0, next_reset_date = $1, updated_at = $2, version = version + 1
            WHERE tenant_id = $3 AND feature_code = $4 AND version = $5
            RETURNING {USAGE_COLUMNS}
            "#
        ))
        .bind(next_reset_date)
        .bind(at)
        .bind(tenant_id)
        .bind(feature_code)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row),
            None => Err(self
                .stale_or_missing(tenant_id, feature_code, expected_version)
                .await),
        }
    }

    async fn find_due_for_reset(&self, now: DateTime<Utc>) -> DbResult<Vec<FeatureUsageRow>> {
        let rows = sqlx::query_as::<_, FeatureUsageRow>(&format!(
            r#"
            SELECT {USAGE_COLUMNS}
            FROM feature_usages
            WHERE reset_period <> 'none' AND next_reset_date IS NOT NULL AND next_reset_date <= $1
            ORDER BY next_reset_date
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
