//! Billing errors

use chrono::{DateTime, Utc};
use hseguard_db::DbError;
use hseguard_types::{ParseError, PlanId, SubscriptionOperation, SubscriptionStatus, TenantId};
use thiserror::Error;

/// Billing errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// Tenant not found
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    /// Tenant exists but has been deactivated
    #[error("tenant is inactive: {0}")]
    TenantInactive(TenantId),

    /// Subscription not found
    #[error("subscription not found")]
    SubscriptionNotFound,

    /// Plan not found
    #[error("plan not found: {0}")]
    PlanNotFound(PlanId),

    /// The tenant already holds a trial, active or suspended subscription
    #[error("tenant {0} already has a current subscription")]
    ActiveSubscriptionExists(TenantId),

    /// Operation not allowed from the subscription's current status
    #[error("cannot {operation} a subscription in status {status}")]
    InvalidTransition {
        /// Status the subscription is in
        status: SubscriptionStatus,
        /// Operation that was attempted
        operation: SubscriptionOperation,
    },

    /// The subscription was modified concurrently; re-read and retry
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// Input failed validation; lists every violated rule
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Setting usage would exceed the plan limit
    #[error("usage limit exceeded for {feature}: {requested} / {limit}")]
    UsageLimitExceeded {
        /// Feature code
        feature: String,
        /// Usage that was requested
        requested: i64,
        /// Plan limit
        limit: i64,
    },

    /// The tenant is not entitled to the feature
    #[error("feature not available: {0}")]
    FeatureNotAvailable(String),

    /// Manual renewal attempted before the renewal window opened
    #[error("renewal not due until {opens_at}")]
    RenewalNotDue {
        /// When the renewal window opens
        opens_at: DateTime<Utc>,
    },

    /// Plan change rejected because current usage does not fit the new plan
    #[error("plan change blocked: {}", .0.join("; "))]
    DowngradeBlocked(Vec<String>),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

impl BillingError {
    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TenantNotFound(_) | Self::SubscriptionNotFound | Self::PlanNotFound(_)
        )
    }

    /// Check if the caller may re-read and retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if the request itself was rejected (bad input or business rule)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::UsageLimitExceeded { .. }
                | Self::FeatureNotAvailable(_)
                | Self::RenewalNotDue { .. }
                | Self::DowngradeBlocked(_)
                | Self::InvalidTransition { .. }
                | Self::ActiveSubscriptionExists(_)
                | Self::TenantInactive(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::TenantInactive(_) => "TENANT_INACTIVE",
            Self::SubscriptionNotFound => "SUBSCRIPTION_NOT_FOUND",
            Self::PlanNotFound(_) => "PLAN_NOT_FOUND",
            Self::ActiveSubscriptionExists(_) => "ACTIVE_SUBSCRIPTION_EXISTS",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UsageLimitExceeded { .. } => "USAGE_LIMIT_EXCEEDED",
            Self::FeatureNotAvailable(_) => "FEATURE_NOT_AVAILABLE",
            Self::RenewalNotDue { .. } => "RENEWAL_NOT_DUE",
            Self::DowngradeBlocked(_) => "DOWNGRADE_BLOCKED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Shorthand for a single-rule validation failure
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }
}

impl From<DbError> for BillingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(msg) => Self::Conflict(msg),
            other => {
                tracing::error!("Database error: {}", other);
                Self::Database(other.to_string())
            }
        }
    }
}

impl From<ParseError> for BillingError {
    fn from(err: ParseError) -> Self {
        tracing::error!("Corrupt stored value: {}", err);
        Self::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = err
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| match &e.message {
                    Some(message) => format!("{field}: {message}"),
                    None => format!("{field}: {}", e.code),
                })
            })
            .collect();
        messages.sort();
        Self::Validation(messages)
    }
}
