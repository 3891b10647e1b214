//! Configuration for the subscription sweeper.

use std::str::FromStr;
use std::time::Duration;

use hseguard_billing_core::BillingConfig;
use hseguard_db::PoolOptions;

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL
    pub database_url: String,
    /// Connection pool sizing
    pub pool: PoolOptions,
    /// Apply pending migrations on startup
    pub run_migrations: bool,
    /// Billing core configuration
    pub billing: BillingConfig,
    /// Capacity of the domain event channel
    pub event_buffer: usize,
    /// Metrics enabled
    pub metrics_enabled: bool,
    /// Port of the Prometheus scrape endpoint
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Database
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let pool = PoolOptions {
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            ..PoolOptions::default()
        };
        let run_migrations = parse_or(&lookup, "RUN_MIGRATIONS", false)?;

        // Billing policy
        let warning_days = match lookup("EXPIRATION_WARNING_DAYS") {
            Some(raw) => parse_days(&raw)?,
            None => vec![7, 3, 1],
        };
        let billing = BillingConfig::new()
            .with_trial_days(parse_or(&lookup, "TRIAL_DAYS", 14)?)
            .with_grace_period_days(parse_or(&lookup, "GRACE_PERIOD_DAYS", 7)?)
            .with_renewal_window_days(parse_or(&lookup, "RENEWAL_WINDOW_DAYS", 0)?)
            .with_expiration_warning_days(warning_days)
            .with_sweep_interval(Duration::from_secs(parse_or(
                &lookup,
                "SWEEP_INTERVAL_SECS",
                3600,
            )?))
            .with_max_conflict_retries(parse_or(&lookup, "MAX_CONFLICT_RETRIES", 3)?)
            .with_max_increment_retries(parse_or(&lookup, "MAX_INCREMENT_RETRIES", 5)?)
            .with_plan_cache_ttl(Duration::from_secs(parse_or(
                &lookup,
                "PLAN_CACHE_TTL_SECS",
                60,
            )?));
        billing
            .validate()
            .map_err(|problems| ConfigError::Policy(problems.join("; ")))?;

        // Events and metrics
        let event_buffer: usize = parse_or(&lookup, "EVENT_BUFFER_SIZE", 1024)?;
        if event_buffer == 0 {
            return Err(ConfigError::Invalid("EVENT_BUFFER_SIZE"));
        }
        let metrics_enabled = parse_or(&lookup, "METRICS_ENABLED", true)?;
        let metrics_port = parse_or(&lookup, "METRICS_PORT", 9102)?;

        Ok(Self {
            database_url,
            pool,
            run_migrations,
            billing,
            event_buffer,
            metrics_enabled,
            metrics_port,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Parse a comma separated day list such as `7,3,1`
fn parse_days(raw: &str) -> Result<Vec<u32>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ConfigError::Invalid("EXPIRATION_WARNING_DAYS"))
        })
        .collect()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid billing policy: {0}")]
    Policy(String),
}
