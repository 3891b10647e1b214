//! HSEGuard Subscription Sweeper
//!
//! Background service that runs the billing core's periodic cycle:
//!
//! - Expire trials, lapsed paid periods and suspensions past their grace period
//! - Send expiration warnings at the configured day thresholds
//! - Reset periodic feature usage counters
//!
//! Domain events are drained from an in-process channel and logged.
//!
//! ## Metrics
//!
//! When `METRICS_ENABLED` is set, a Prometheus scrape endpoint listens on
//! `METRICS_PORT` (default 9102).

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use hseguard_billing_core::{
    ChannelEventPublisher, Clock, EventReceiver, ExpirationSweeper, FeatureUsageTracker,
    SubscriptionService, SystemClock, TracingNotificationSender,
};
use hseguard_db::{Repositories, RepositorySet};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("subscription_sweeper=debug".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting HSEGuard subscription sweeper");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        sweep_interval_secs = config.billing.sweep_interval.as_secs(),
        warning_days = ?config.billing.expiration_warning_days,
        metrics_enabled = config.metrics_enabled,
        "Configuration loaded"
    );

    // Initialize metrics
    if config.metrics_enabled {
        setup_metrics(config.metrics_port)?;
    }

    // Create database pool
    let pool =
        hseguard_db::create_pool_with_options(&config.database_url, config.pool.clone()).await?;
    tracing::info!("Database pool created");

    if config.run_migrations {
        hseguard_db::run_migrations(&pool).await?;
    }

    // Wire the billing core
    let repos: RepositorySet = Repositories::new(pool).into();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (publisher, events) = ChannelEventPublisher::new(config.event_buffer);
    let event_log = tokio::spawn(log_events(events));

    let service = SubscriptionService::new(
        repos.clone(),
        config.billing.clone(),
        Arc::clone(&clock),
        Arc::new(TracingNotificationSender),
        Arc::new(publisher),
    );
    let tracker = FeatureUsageTracker::new(
        repos,
        service.catalog().clone(),
        clock,
        config.billing.max_increment_retries,
    );
    let sweeper = ExpirationSweeper::new(service, tracker);

    sweeper.run(shutdown_signal()).await;

    // Dropping the last publisher closes the channel so the log task drains and exits
    drop(sweeper);
    event_log.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn log_events(mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        metrics::counter!("subscription_events_total", "event" => event.name()).increment(1);
        tracing::info!(
            event = event.name(),
            tenant_id = %event.tenant_id(),
            "Domain event"
        );
    }
}

fn setup_metrics(port: u16) -> anyhow::Result<()> {
    // Sweeps touch every due subscription; most finish well under a minute
    let sweep_buckets = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full("subscription_sweep_duration_seconds".to_string()),
            sweep_buckets,
        )?
        .install()?;

    metrics::describe_counter!(
        "subscription_transitions_total",
        "Committed subscription transitions by operation"
    );
    metrics::describe_counter!(
        "subscription_sweep_failures_total",
        "Subscriptions the sweeper failed to expire"
    );
    metrics::describe_counter!(
        "feature_usage_resets_total",
        "Periodic usage counters returned to zero"
    );
    metrics::describe_counter!(
        "subscription_events_total",
        "Domain events published by type"
    );
    metrics::describe_histogram!(
        "subscription_sweep_duration_seconds",
        "Duration of one full sweep cycle in seconds"
    );

    tracing::info!(port, "Prometheus metrics endpoint listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, finishing current cycle");
}
