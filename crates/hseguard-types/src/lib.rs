//! HSEGuard Types - Shared domain types
//!
//! This crate contains domain types used across HSEGuard services:
//! - Tenant, plan, subscription and payment identifiers
//! - Plans, features and the default feature catalog
//! - Subscription status, history and payment records
//! - Feature usage snapshots and domain events

pub mod ids;
pub mod plan;
pub mod subscription;
pub mod usage;
pub mod event;
pub mod error;

pub use ids::*;
pub use plan::*;
pub use subscription::*;
pub use usage::*;
pub use event::*;
pub use error::*;
