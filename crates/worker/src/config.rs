//! Environment-driven worker configuration.
//!
//! Tunables warn and fall back to defaults when unset or unparseable; only
//! the database URL is hard-required, and that is enforced by the binary.

use std::time::Duration;

use tracing::warn;

use crate::admission::IdempotencyFailPolicy;
use crate::worker::WorkerConfig;

/// Everything the worker binary reads from the environment.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub database_url: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub worker: WorkerConfig,
    pub idempotency_fail_policy: IdempotencyFailPolicy,
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        let database_url = std::env::var("MANIFOLD_DATABASE_URL").ok();

        let openai_api_key = std::env::var("MANIFOLD_OPENAI_API_KEY").unwrap_or_else(|_| {
            warn!("MANIFOLD_OPENAI_API_KEY not set; using dev placeholder");
            "dev-key".to_string()
        });

        let defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            poll_interval: Duration::from_millis(parse_or(
                "MANIFOLD_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            visibility_timeout: Duration::from_secs(parse_or(
                "MANIFOLD_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout.as_secs(),
            )),
            batch_size: parse_or("MANIFOLD_BATCH_SIZE", defaults.batch_size),
            max_deliveries: parse_or("MANIFOLD_MAX_DELIVERIES", defaults.max_deliveries),
        };

        Self {
            database_url,
            openai_api_key,
            openai_base_url: std::env::var("MANIFOLD_OPENAI_BASE_URL").ok(),
            openai_model: std::env::var("MANIFOLD_OPENAI_MODEL").ok(),
            worker,
            idempotency_fail_policy: fail_policy_from_env(),
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Display>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Err(_) => default,
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var, value = %raw, default = %default, "unparseable value; using default");
            default
        }),
    }
}

fn fail_policy_from_env() -> IdempotencyFailPolicy {
    match std::env::var("MANIFOLD_IDEMPOTENCY_FAIL_POLICY").as_deref() {
        Ok("fail_closed") => IdempotencyFailPolicy::FailClosed,
        Ok("fail_open") | Err(_) => IdempotencyFailPolicy::FailOpen,
        Ok(other) => {
            warn!(value = other, "unknown idempotency fail policy; using fail_open");
            IdempotencyFailPolicy::FailOpen
        }
    }
}
