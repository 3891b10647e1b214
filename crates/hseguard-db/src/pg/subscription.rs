//! PostgreSQL subscription repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::{PaymentRow, SubscriptionHistoryRow, SubscriptionRow};
use crate::repo::{CreateSubscription, NewHistoryEntry, SubscriptionRepository, TransitionWrite};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, tenant_id, plan_id, status, start_date, end_date, next_billing_date,
    auto_renew, grace_period_end, suspended_at, suspended_seconds,
    last_notified_threshold, cancel_reason, created_at, created_by, updated_at, version
"#;

/// PostgreSQL subscription repository
#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    /// Create a new subscription repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append_history(
        tx: &mut Transaction<'_, Postgres>,
        subscription_id: Uuid,
        entry: &NewHistoryEntry,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_history
                (subscription_id, old_status, new_status, operation, reason, actor, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(subscription_id)
        .bind(&entry.old_status)
        .bind(&entry.new_status)
        .bind(&entry.operation)
        .bind(&entry.reason)
        .bind(&entry.actor)
        .bind(entry.occurred_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Distinguish a stale version from a missing row after a zero-row update
    async fn conflict_or_missing(&self, id: Uuid, expected_version: i64) -> DbError {
        match self.find_by_id(id).await {
            Ok(Some(row)) => DbError::Conflict(format!(
                "subscription {id} is at version {}, expected {expected_version}",
                row.version
            )),
            Ok(None) => DbError::NotFound,
            Err(e) => e,
        }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SubscriptionRow>> {
        let sub = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sub)
    }

    async fn find_current_by_tenant(&self, tenant_id: Uuid) -> DbResult<Option<SubscriptionRow>> {
        let sub = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE tenant_id = $1 AND status IN ('trial', 'active', 'suspended')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sub)
    }

    async fn find_expiration_candidates(
        &self,
        now: DateTime<Utc>,
        renewal_cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<SubscriptionRow>> {
        let subs = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE (status = 'active' AND end_date < $1 AND NOT auto_renew)
               OR (status = 'active' AND end_date < $2 AND auto_renew)
               OR (status = 'trial' AND end_date < $1)
               OR (status = 'suspended' AND grace_period_end < $1)
            ORDER BY end_date
            "#
        ))
        .bind(now)
        .bind(renewal_cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    async fn find_ending_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DbResult<Vec<SubscriptionRow>> {
        let subs = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE status IN ('trial', 'active') AND end_date >= $1 AND end_date <= $2
            ORDER BY end_date
            "#
        ))
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    async fn create(&self, sub: CreateSubscription) -> DbResult<SubscriptionRow> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            INSERT INTO subscriptions (id, tenant_id, plan_id, status, start_date, end_date,
                                       next_billing_date, auto_renew, created_at, created_by,
                                       updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $9)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(sub.id)
        .bind(sub.tenant_id)
        .bind(sub.plan_id)
        .bind(&sub.status)
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(sub.next_billing_date)
        .bind(sub.auto_renew)
        .bind(sub.created_at)
        .bind(&sub.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DbError::from_insert(e, "current subscription for tenant"))?;

        Self::append_history(&mut tx, row.id, &sub.history).await?;
        tx.commit().await?;

        Ok(row)
    }

    async fn apply_transition(&self, write: TransitionWrite) -> DbResult<SubscriptionRow> {
        let mut tx = self.pool.begin().await?;
        let update = &write.update;

        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            UPDATE subscriptions
            SET plan_id = $1, status = $2, start_date = $3, end_date = $4,
                next_billing_date = $5, auto_renew = $6, grace_period_end = $7,
                suspended_at = $8, suspended_seconds = $9, last_notified_threshold = $10,
                cancel_reason = $11, updated_at = $12, version = version + 1
            WHERE id = $13 AND version = $14
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(update.plan_id)
        .bind(&update.status)
        .bind(update.start_date)
        .bind(update.end_date)
        .bind(update.next_billing_date)
        .bind(update.auto_renew)
        .bind(update.grace_period_end)
        .bind(update.suspended_at)
        .bind(update.suspended_seconds)
        .bind(update.last_notified_threshold)
        .bind(&update.cancel_reason)
        .bind(update.updated_at)
        .bind(write.subscription_id)
        .bind(write.expected_version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(self
                .conflict_or_missing(write.subscription_id, write.expected_version)
                .await);
        };

        Self::append_history(&mut tx, row.id, &write.history).await?;

        if let Some(payment) = &write.payment {
            sqlx::query(
                r#"
                INSERT INTO payments (id, subscription_id, amount_minor, currency, status,
                                      transaction_id, paid_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(payment.id)
            .bind(row.id)
            .bind(payment.amount_minor)
            .bind(&payment.currency)
            .bind(&payment.status)
            .bind(&payment.transaction_id)
            .bind(payment.paid_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::from_insert(e, "payment"))?;
        }

        for snapshot in &write.usage_limits {
            sqlx::query(
                r#"
                UPDATE feature_usages
                SET usage_limit = $1, reset_period = $2, next_reset_date = $3, updated_at = $4,
                    version = version + 1
                WHERE tenant_id = $5 AND feature_code = $6
                "#,
            )
            .bind(snapshot.usage_limit)
            .bind(&snapshot.reset_period)
            .bind(snapshot.next_reset_date)
            .bind(update.updated_at)
            .bind(write.tenant_id)
            .bind(&snapshot.feature_code)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(row)
    }

    async fn set_notified_threshold(
        &self,
        id: Uuid,
        expected_version: i64,
        threshold_days: i32,
    ) -> DbResult<SubscriptionRow> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            UPDATE subscriptions
            SET last_notified_threshold = $1, updated_at = NOW(), version = version + 1
            WHERE id = $2 AND version = $3
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(threshold_days)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row),
            None => Err(self.conflict_or_missing(id, expected_version).await),
        }
    }

    async fn list_history(&self, id: Uuid) -> DbResult<Vec<SubscriptionHistoryRow>> {
        let rows = sqlx::query_as::<_, SubscriptionHistoryRow>(
            r#"
            SELECT id, subscription_id, old_status, new_status, operation, reason, actor,
                   occurred_at
            FROM subscription_history
            WHERE subscription_id = $1
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_payments(&self, id: Uuid) -> DbResult<Vec<PaymentRow>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, subscription_id, amount_minor, currency, status, transaction_id, paid_at
            FROM payments
            WHERE subscription_id = $1
            ORDER BY paid_at
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
