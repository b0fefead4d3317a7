//! # Controller Configuration
//!
//! Scan behaviour settings loaded from environment variables.

use super::{env_var_or_default, parse_kubernetes_duration};
use crate::controller::expiry::NaiveZone;
use crate::controller::restart::RetryPolicy;
use std::time::Duration;
use tracing::warn;

/// Controller configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Annotation key carrying the expiry value
    pub expiry_annotation_key: String,
    /// Scan cadence, owned by the scan loop
    pub poll_interval: Duration,
    /// Restrict scanning to a single namespace (None = all namespaces)
    pub namespace_scope: Option<String>,
    /// Zone applied to timestamps that carry no offset
    pub naive_zone: NaiveZone,
    /// Maximum write attempts per Deployment restart
    pub restart_max_attempts: u32,
    /// First backoff between conflicting writes (milliseconds)
    pub restart_retry_base_ms: u64,
    /// Backoff cap between conflicting writes (milliseconds)
    pub restart_retry_max_ms: u64,
    /// Timeout for every control-plane call (seconds)
    pub request_timeout_secs: u64,
    /// Trigger a scan when an annotated Secret changes
    pub watch_secrets: bool,
    /// Resolve consumers but never write
    pub dry_run: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            expiry_annotation_key: DEFAULT_EXPIRY_ANNOTATION_KEY.to_string(),
            poll_interval: default_poll_interval(),
            namespace_scope: None,
            naive_zone: NaiveZone::Utc,
            restart_max_attempts: DEFAULT_RESTART_MAX_ATTEMPTS,
            restart_retry_base_ms: DEFAULT_RESTART_RETRY_BASE_MS,
            restart_retry_max_ms: DEFAULT_RESTART_RETRY_MAX_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            watch_secrets: true,
            dry_run: false,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;

        let expiry_annotation_key = std::env::var("EXPIRY_ANNOTATION_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPIRY_ANNOTATION_KEY.to_string());

        let poll_interval = match std::env::var("POLL_INTERVAL") {
            Ok(raw) => parse_kubernetes_duration(&raw).unwrap_or_else(|e| {
                warn!("Invalid POLL_INTERVAL '{}': {}, using {}", raw, e, DEFAULT_POLL_INTERVAL);
                default_poll_interval()
            }),
            Err(_) => default_poll_interval(),
        };

        let namespace_scope = std::env::var("NAMESPACE_SCOPE")
            .ok()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        Self {
            expiry_annotation_key,
            poll_interval,
            namespace_scope,
            naive_zone: env_var_or_default("NAIVE_TIMESTAMP_ZONE", NaiveZone::Utc),
            restart_max_attempts: env_var_or_default(
                "RESTART_MAX_ATTEMPTS",
                DEFAULT_RESTART_MAX_ATTEMPTS,
            )
            .max(1),
            restart_retry_base_ms: env_var_or_default(
                "RESTART_RETRY_BASE_MS",
                DEFAULT_RESTART_RETRY_BASE_MS,
            ),
            restart_retry_max_ms: env_var_or_default(
                "RESTART_RETRY_MAX_MS",
                DEFAULT_RESTART_RETRY_MAX_MS,
            ),
            request_timeout_secs: env_var_or_default(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            ),
            watch_secrets: env_var_or_default("WATCH_SECRETS", true),
            dry_run: env_var_or_default("DRY_RUN", false),
        }
    }

    /// Retry policy for conflicting Deployment writes
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.restart_max_attempts,
            base_backoff: Duration::from_millis(self.restart_retry_base_ms),
            max_backoff: Duration::from_millis(self.restart_retry_max_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_poll_interval() -> Duration {
    parse_kubernetes_duration(crate::constants::DEFAULT_POLL_INTERVAL)
        .unwrap_or(Duration::from_secs(60))
}
