//! PostgreSQL tenant repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::TenantRow;
use crate::repo::{CreateTenant, TenantRepository};

/// PostgreSQL tenant repository
#[derive(Clone)]
pub struct PgTenantRepository {
    pool: PgPool,
}

impl PgTenantRepository {
    /// Create a new tenant repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepository for PgTenantRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<TenantRow>> {
        let tenant = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, is_active, created_at, created_by, deactivated_at, deactivated_by
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn create(&self, tenant: CreateTenant) -> DbResult<TenantRow> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            INSERT INTO tenants (id, name, created_by, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, is_active, created_at, created_by, deactivated_at, deactivated_by
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.created_by)
        .bind(tenant.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, "tenant"))?;

        Ok(row)
    }

    async fn deactivate(&self, id: Uuid, actor: &str, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET is_active = FALSE, deactivated_at = $1, deactivated_by = $2
            WHERE id = $3
            "#,
        )
        .bind(at)
        .bind(actor)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }
}
