//! PostgreSQL repository implementations

mod plan;
mod subscription;
mod tenant;
mod usage;

pub use plan::PgPlanRepository;
pub use subscription::PgSubscriptionRepository;
pub use tenant::PgTenantRepository;
pub use usage::PgFeatureUsageRepository;

use std::sync::Arc;

use crate::repo::RepositorySet;
use crate::DbPool;

/// All repositories bundled together
#[derive(Clone)]
pub struct Repositories {
    pub tenants: PgTenantRepository,
    pub plans: PgPlanRepository,
    pub subscriptions: PgSubscriptionRepository,
    pub usage: PgFeatureUsageRepository,
}

impl Repositories {
    /// Create all repositories from a database pool
    pub fn new(pool: DbPool) -> Self {
        Self {
            tenants: PgTenantRepository::new(pool.clone()),
            plans: PgPlanRepository::new(pool.clone()),
            subscriptions: PgSubscriptionRepository::new(pool.clone()),
            usage: PgFeatureUsageRepository::new(pool),
        }
    }
}

impl From<Repositories> for RepositorySet {
    fn from(repos: Repositories) -> Self {
        Self {
            tenants: Arc::new(repos.tenants),
            plans: Arc::new(repos.plans),
            subscriptions: Arc::new(repos.subscriptions),
            usage: Arc::new(repos.usage),
        }
    }
}
