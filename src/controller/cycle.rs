//! # Scan Cycle
//!
//! One pass over every credential: evaluate its expiry, resolve the consumers of the
//! expired ones and restart their Deployments.
//!
//! Failures are isolated per credential and per Deployment; a cycle always completes and
//! returns a `CycleReport`. Cycles never overlap: `run` holds the handled-expiry state
//! for its whole duration.

use crate::config::ControllerConfig;
use crate::controller::client::ClusterClient;
use crate::controller::expiry::{ExpiryEvaluator, ResolvedExpiry};
use crate::controller::resolver::{ConsumerResolver, Consumers};
use crate::controller::restart::RestartOrchestrator;
use crate::controller::types::{Credential, ObjectKey};
use crate::observability;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

/// Scan behaviour independent of the control-plane client
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub annotation_key: String,
    pub namespace_scope: Option<String>,
    pub dry_run: bool,
}

impl From<&ControllerConfig> for ScanSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            annotation_key: config.expiry_annotation_key.clone(),
            namespace_scope: config.namespace_scope.clone(),
            dry_run: config.dry_run,
        }
    }
}

/// Expiry each credential was last remediated for.
///
/// An entry is recorded once every implicated Deployment restarted, or complete discovery
/// found none, and suppresses repeat restarts on later cycles. Entries match on both the raw annotation value and the instant
/// it resolved to, so a recreated Secret with a relative value expires afresh. An entry is
/// dropped when the annotation value changes or is removed, or when the credential is no
/// longer listed.
#[derive(Debug, Default)]
pub struct HandledExpiries {
    entries: HashMap<ObjectKey, HandledExpiry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HandledExpiry {
    raw_value: String,
    expires_at: DateTime<Utc>,
}

impl HandledExpiries {
    pub fn is_handled(&self, key: &ObjectKey, raw_value: &str, expires_at: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|handled| handled.raw_value == raw_value && handled.expires_at == expires_at)
    }

    pub fn record(&mut self, key: ObjectKey, raw_value: String, expires_at: DateTime<Utc>) {
        self.entries.insert(
            key,
            HandledExpiry {
                raw_value,
                expires_at,
            },
        );
    }

    /// Drop the entry when the annotation changed or went away
    pub fn observe(&mut self, key: &ObjectKey, raw_value: Option<&str>) {
        if self.entries.get(key).map(|handled| handled.raw_value.as_str()) != raw_value {
            self.entries.remove(key);
        }
    }

    pub fn retain_listed(&mut self, listed: &HashSet<ObjectKey>) {
        self.entries.retain(|key, _| listed.contains(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of one restart within a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RestartStatus {
    #[serde(rename_all = "camelCase")]
    Restarted { restarted_at: DateTime<Utc> },
    Failed { error: String },
    /// Another expired credential already restarted it in this cycle
    AlreadyRestarted,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartReport {
    pub deployment: String,
    #[serde(flatten)]
    pub status: RestartStatus,
}

/// What happened to one credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CredentialOutcome {
    FormatError {
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    NotExpired {
        expiry: ResolvedExpiry,
    },
    /// Expired, but already remediated for this annotation value
    #[serde(rename_all = "camelCase")]
    AlreadyHandled {
        expiry: ResolvedExpiry,
    },
    #[serde(rename_all = "camelCase")]
    Expired {
        expiry: ResolvedExpiry,
        consumers: Consumers,
        restarts: Vec<RestartReport>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialReport {
    pub namespace: String,
    pub name: String,
    pub raw_value: String,
    pub expired: bool,
    #[serde(flatten)]
    pub outcome: CredentialOutcome,
}

/// Per-cycle report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub now: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_scope: Option<String>,
    pub dry_run: bool,
    pub credentials_listed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_error: Option<String>,
    pub entries: Vec<CredentialReport>,
}

impl CycleReport {
    pub fn format_errors(&self) -> impl Iterator<Item = &CredentialReport> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, CredentialOutcome::FormatError { .. }))
    }

    pub fn not_expired(&self) -> impl Iterator<Item = &CredentialReport> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, CredentialOutcome::NotExpired { .. }))
    }

    pub fn expired(&self) -> impl Iterator<Item = &CredentialReport> {
        self.entries.iter().filter(|e| e.expired)
    }

    /// Every restart attempted or skipped in this cycle, with its credential
    pub fn restarts(&self) -> impl Iterator<Item = (&CredentialReport, &RestartReport)> {
        self.entries.iter().flat_map(|entry| {
            let restarts = match &entry.outcome {
                CredentialOutcome::Expired { restarts, .. } => restarts.as_slice(),
                _ => &[],
            };
            restarts.iter().map(move |restart| (entry, restart))
        })
    }

    pub fn entry(&self, namespace: &str, name: &str) -> Option<&CredentialReport> {
        self.entries
            .iter()
            .find(|e| e.namespace == namespace && e.name == name)
    }
}

/// Runs scan cycles against an injected cluster client
pub struct ScanCycle {
    client: Arc<dyn ClusterClient>,
    evaluator: ExpiryEvaluator,
    resolver: ConsumerResolver,
    orchestrator: RestartOrchestrator,
    settings: ScanSettings,
    handled: Mutex<HandledExpiries>,
}

impl fmt::Debug for ScanCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanCycle")
            .field("evaluator", &self.evaluator)
            .field("orchestrator", &self.orchestrator)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ScanCycle {
    pub fn new(client: Arc<dyn ClusterClient>, config: &ControllerConfig) -> Self {
        let orchestrator = RestartOrchestrator::new(Arc::clone(&client), config.retry_policy());
        Self::with_parts(
            client,
            ScanSettings::from(config),
            ExpiryEvaluator::new(config.naive_zone),
            orchestrator,
        )
    }

    pub fn with_parts(
        client: Arc<dyn ClusterClient>,
        settings: ScanSettings,
        evaluator: ExpiryEvaluator,
        orchestrator: RestartOrchestrator,
    ) -> Self {
        Self {
            resolver: ConsumerResolver::new(Arc::clone(&client)),
            client,
            evaluator,
            orchestrator,
            settings,
            handled: Mutex::new(HandledExpiries::default()),
        }
    }

    /// Number of credentials currently suppressed as already handled
    pub async fn handled_count(&self) -> usize {
        self.handled.lock().await.len()
    }

    /// Run one cycle, evaluating expiry against `now`
    pub async fn run(&self, now: DateTime<Utc>) -> CycleReport {
        let span = tracing::info_span!(
            "scan.cycle",
            namespace_scope = self.settings.namespace_scope.as_deref().unwrap_or("*"),
            dry_run = self.settings.dry_run,
        );
        self.run_locked(now).instrument(span).await
    }

    async fn run_locked(&self, now: DateTime<Utc>) -> CycleReport {
        let mut handled = self.handled.lock().await;
        let started = std::time::Instant::now();

        let mut report = CycleReport {
            now,
            namespace_scope: self.settings.namespace_scope.clone(),
            dry_run: self.settings.dry_run,
            credentials_listed: 0,
            list_error: None,
            entries: Vec::new(),
        };

        let secrets = match self
            .client
            .list_secrets(self.settings.namespace_scope.as_deref())
            .await
        {
            Ok(secrets) => secrets,
            Err(e) => {
                error!(error = %e, "Failed to list credentials, skipping cycle");
                report.list_error = Some(e.to_string());
                finish_cycle(&report, started);
                return report;
            }
        };
        report.credentials_listed = secrets.len();

        let mut listed = HashSet::new();
        let mut restarted: HashMap<ObjectKey, bool> = HashMap::new();

        for secret in &secrets {
            let Some(credential) = Credential::from_secret(secret) else {
                continue;
            };
            listed.insert(credential.key.clone());

            let annotation = credential.expiry_value(&self.settings.annotation_key);
            handled.observe(&credential.key, annotation);

            let Some(record) = self
                .evaluator
                .record(&credential, &self.settings.annotation_key, now)
            else {
                continue;
            };
            observability::metrics::increment_credentials_evaluated();

            let key = &record.credential;
            let outcome = match record.expiry {
                Err(e) => {
                    warn!(
                        namespace = %key.namespace,
                        name = %key.name,
                        value = %record.raw_value,
                        error = %e,
                        "Skipping credential with unusable expiry annotation"
                    );
                    observability::metrics::increment_format_errors();
                    CredentialOutcome::FormatError {
                        error: e.to_string(),
                    }
                }
                Ok(expiry) if !record.expired => {
                    debug!(
                        namespace = %key.namespace,
                        name = %key.name,
                        expires_at = %expiry.expires_at.to_rfc3339(),
                        "credential.not_expired"
                    );
                    CredentialOutcome::NotExpired { expiry }
                }
                Ok(expiry) => {
                    observability::metrics::increment_credentials_expired();
                    if handled.is_handled(key, &record.raw_value, expiry.expires_at) {
                        debug!(
                            namespace = %key.namespace,
                            name = %key.name,
                            "Expired credential already remediated for this expiry value"
                        );
                        CredentialOutcome::AlreadyHandled { expiry }
                    } else {
                        let (consumers, restarts) = self.remediate(key, &mut restarted).await;
                        // DaemonSet- or ReplicaSet-only consumers have nothing to restart
                        let remediated = !self.settings.dry_run
                            && consumers.is_complete()
                            && restarts.iter().all(|r| {
                                matches!(
                                    r.status,
                                    RestartStatus::Restarted { .. } | RestartStatus::AlreadyRestarted
                                )
                            });
                        if remediated {
                            handled.record(key.clone(), record.raw_value.clone(), expiry.expires_at);
                        }
                        CredentialOutcome::Expired {
                            expiry,
                            consumers,
                            restarts,
                        }
                    }
                }
            };

            report.entries.push(CredentialReport {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                raw_value: record.raw_value.clone(),
                expired: record.expired,
                outcome,
            });
        }

        handled.retain_listed(&listed);
        finish_cycle(&report, started);
        report
    }

    /// Resolve consumers of an expired credential and restart its Deployments.
    /// `restarted` tracks Deployments already attempted in this cycle (true = succeeded).
    async fn remediate(
        &self,
        credential: &ObjectKey,
        restarted: &mut HashMap<ObjectKey, bool>,
    ) -> (Consumers, Vec<RestartReport>) {
        let namespace = credential.namespace.as_str();
        let consumers = self.resolver.resolve(namespace, &credential.name).await;

        info!(
            namespace,
            name = %credential.name,
            deployments = ?consumers.deployments,
            replica_sets = ?consumers.replica_sets,
            daemon_sets = ?consumers.daemon_sets,
            "credential.expired"
        );

        let mut restarts = Vec::with_capacity(consumers.deployments.len());
        for deployment in &consumers.deployments {
            let target = ObjectKey::new(namespace, deployment.as_str());

            let status = if self.settings.dry_run {
                info!(namespace, deployment = %deployment, "Dry run, not restarting Deployment");
                RestartStatus::DryRun
            } else if let Some(&succeeded) = restarted.get(&target) {
                if succeeded {
                    RestartStatus::AlreadyRestarted
                } else {
                    RestartStatus::Failed {
                        error: "an earlier restart attempt in this cycle failed".to_string(),
                    }
                }
            } else {
                match self.orchestrator.restart(namespace, deployment).await {
                    Ok(restarted_at) => {
                        restarted.insert(target, true);
                        RestartStatus::Restarted { restarted_at }
                    }
                    Err(e) => {
                        error!(
                            namespace,
                            deployment = %deployment,
                            credential = %credential.name,
                            error = %e,
                            "Failed to restart Deployment"
                        );
                        observability::metrics::increment_restart_failures();
                        restarted.insert(target, false);
                        RestartStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };

            restarts.push(RestartReport {
                deployment: deployment.clone(),
                status,
            });
        }

        (consumers, restarts)
    }
}

fn finish_cycle(report: &CycleReport, started: std::time::Instant) {
    observability::metrics::increment_cycles();
    observability::metrics::observe_cycle_duration(started.elapsed().as_secs_f64());
    observability::metrics::set_last_cycle_timestamp(report.now.timestamp());

    let restarted = report
        .restarts()
        .filter(|(_, r)| matches!(r.status, RestartStatus::Restarted { .. }))
        .count();
    info!(
        listed = report.credentials_listed,
        evaluated = report.entries.len(),
        expired = report.expired().count(),
        format_errors = report.format_errors().count(),
        restarted,
        "scan.cycle.complete"
    );

    match serde_json::to_string(report) {
        Ok(json) if report.entries.is_empty() => debug!(report = %json, "scan.cycle.report"),
        Ok(json) => info!(report = %json, "scan.cycle.report"),
        Err(e) => warn!(error = %e, "Failed to serialize cycle report"),
    }
}
