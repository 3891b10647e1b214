//! HSEGuard DB - Database abstractions
//!
//! SQLx-based database layer for HSEGuard services. Subscription and
//! feature-usage rows carry a `version` column; every write is conditional on
//! the version the caller read, and a lost race surfaces as
//! [`DbError::Conflict`].
//!
//! # Example
//!
//! ```rust,ignore
//! use hseguard_db::{create_pool, Repositories, SubscriptionRepository};
//!
//! let pool = create_pool("postgres://localhost/hseguard").await?;
//! let repos = Repositories::new(pool);
//!
//! let current = repos.subscriptions.find_current_by_tenant(tenant_id).await?;
//! ```

pub mod error;
pub mod models;
pub mod pg;
pub mod pool;
pub mod repo;

pub use error::{DbError, DbResult};
pub use models::*;
pub use pg::Repositories;
pub use pool::{create_pool, create_pool_with_options, run_migrations, DbPool, PoolOptions};
pub use repo::*;
