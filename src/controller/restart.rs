//! # Rollout Restart
//!
//! Forces the pods of a Deployment to be recreated by stamping the pod template with a
//! `kubectl.kubernetes.io/restartedAt` annotation, the same mechanism as
//! `kubectl rollout restart`.
//!
//! The get-mutate-replace sequence runs under optimistic concurrency: a write rejected
//! because the Deployment changed since it was read is retried against a fresh copy, with
//! Fibonacci backoff, up to a bounded number of attempts.

use crate::constants::RESTARTED_AT_ANNOTATION;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::client::{ClientError, ClusterClient};
use crate::observability;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Source of restart timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Bounded retry for conflicting writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total write attempts, including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            max_attempts: DEFAULT_RESTART_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_RESTART_RETRY_BASE_MS),
            max_backoff: Duration::from_millis(DEFAULT_RESTART_RETRY_MAX_MS),
        }
    }
}

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("deployment {namespace}/{name}: still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted {
        namespace: String,
        name: String,
        attempts: u32,
    },
    #[error("deployment {namespace}/{name}: {source}")]
    Client {
        namespace: String,
        name: String,
        #[source]
        source: ClientError,
    },
}

/// Format used for the restart annotation value
pub fn format_restarted_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Set the restart annotation on the pod template, creating maps as needed
pub fn stamp_restart(deployment: &mut Deployment, at: DateTime<Utc>) {
    let spec = deployment.spec.get_or_insert_with(Default::default);
    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default)
        .insert(RESTARTED_AT_ANNOTATION.to_string(), format_restarted_at(at));
}

/// Performs conflict-safe rollout restarts
#[derive(Clone)]
pub struct RestartOrchestrator {
    client: Arc<dyn ClusterClient>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl fmt::Debug for RestartOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartOrchestrator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RestartOrchestrator {
    pub fn new(client: Arc<dyn ClusterClient>, policy: RetryPolicy) -> Self {
        Self::with_clock(client, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        client: Arc<dyn ClusterClient>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            clock,
            policy,
        }
    }

    /// Restart one Deployment. Returns the timestamp that was written.
    pub async fn restart(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DateTime<Utc>, RestartError> {
        let client_error = |source: ClientError| RestartError::Client {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        };

        let mut backoff = FibonacciBackoff::new(self.policy.base_backoff, self.policy.max_backoff);
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            // Always mutate the latest version
            let mut deployment = self
                .client
                .get_deployment(namespace, name)
                .await
                .map_err(client_error)?;

            let restarted_at = self.clock.now();
            stamp_restart(&mut deployment, restarted_at);

            match self.client.replace_deployment(namespace, &deployment).await {
                Ok(_) => {
                    info!(
                        namespace,
                        deployment = name,
                        attempt,
                        restarted_at = %format_restarted_at(restarted_at),
                        "restart.success"
                    );
                    observability::metrics::increment_restarts();
                    return Ok(restarted_at);
                }
                Err(e) if e.is_conflict() => {
                    observability::metrics::increment_restart_conflicts();
                    if attempt == max_attempts {
                        break;
                    }
                    let delay = backoff.next_backoff();
                    warn!(
                        namespace,
                        deployment = name,
                        attempt,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Deployment changed while restarting, retrying on latest version"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(client_error(e)),
            }
        }

        Err(RestartError::ConflictRetriesExhausted {
            namespace: namespace.to_string(),
            name: name.to_string(),
            attempts: max_attempts,
        })
    }
}
