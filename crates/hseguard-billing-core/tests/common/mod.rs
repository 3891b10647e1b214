//! Common test utilities for hseguard-billing-core integration tests

#![allow(dead_code)]

pub mod harness;
pub mod mock_repos;

#[allow(unused_imports)]
pub use harness::{payment, start_time, RecordingNotifier, RecordingPublisher, TestHarness};
#[allow(unused_imports)]
pub use mock_repos::{
    MockFeatureUsageRepository, MockPlanRepository, MockSubscriptionRepository,
    MockTenantRepository,
};
