//! # Consumer Resolution
//!
//! Finds the workloads that mount a credential, grouped by kind.
//!
//! Two independent strategies are merged by set union:
//!
//! - **Live pods**: pods mounting the credential, walked up through their owner
//!   references (controller ReplicaSet → Deployment, DaemonSet).
//! - **Controller templates**: ReplicaSets and DaemonSets whose pod template mounts the
//!   credential, which also covers workloads scaled to zero.
//!
//! A failed list call only voids that kind's contribution; resolution itself never fails.

use crate::controller::client::{ClientError, ClusterClient};
use crate::controller::workload::{owners, pod_mounts_secret, Workload, WorkloadKind};
use crate::observability;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Resource kinds listed during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListedKind {
    Pod,
    ReplicaSet,
    DaemonSet,
}

impl fmt::Display for ListedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Pod => "Pod",
            Self::ReplicaSet => "ReplicaSet",
            Self::DaemonSet => "DaemonSet",
        };
        f.write_str(kind)
    }
}

/// A list call for one resource kind failed
#[derive(Debug, Error)]
#[error("failed to list {kind}s in namespace {namespace}: {source}")]
pub struct DiscoveryListError {
    pub kind: ListedKind,
    pub namespace: String,
    #[source]
    pub source: ClientError,
}

/// Serializable summary of a `DiscoveryListError`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryFailure {
    pub kind: ListedKind,
    pub message: String,
}

impl From<&DiscoveryListError> for DiscoveryFailure {
    fn from(error: &DiscoveryListError) -> Self {
        Self {
            kind: error.kind,
            message: error.source.to_string(),
        }
    }
}

/// Workloads implicated by a credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumers {
    pub deployments: BTreeSet<String>,
    pub replica_sets: BTreeSet<String>,
    pub daemon_sets: BTreeSet<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<DiscoveryFailure>,
}

impl Consumers {
    pub fn names(&self, kind: WorkloadKind) -> &BTreeSet<String> {
        match kind {
            WorkloadKind::Deployment => &self.deployments,
            WorkloadKind::ReplicaSet => &self.replica_sets,
            WorkloadKind::DaemonSet => &self.daemon_sets,
        }
    }

    /// Every list call succeeded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty() && self.replica_sets.is_empty() && self.daemon_sets.is_empty()
    }
}

/// Derive a Deployment name from a ReplicaSet name by dropping the generated hash suffix.
///
/// `myapp-7d8f9c9c79` → `myapp`. Names with a single segment yield `None`.
/// This is best effort: owner references are preferred wherever the ReplicaSet is known.
pub fn derive_deployment_name(replica_set_name: &str) -> Option<String> {
    let (prefix, _hash) = replica_set_name.rsplit_once('-')?;
    (!prefix.is_empty()).then(|| prefix.to_string())
}

fn in_namespace(meta: &ObjectMeta, namespace: &str) -> bool {
    meta.namespace.as_deref().is_none_or(|ns| ns == namespace)
}

/// Resolves the consumers of a credential through the injected cluster client
#[derive(Clone)]
pub struct ConsumerResolver {
    client: Arc<dyn ClusterClient>,
}

impl fmt::Debug for ConsumerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerResolver").finish_non_exhaustive()
    }
}

impl ConsumerResolver {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Resolve the workloads in `namespace` that mount `secret_name`
    pub async fn resolve(&self, namespace: &str, secret_name: &str) -> Consumers {
        let (pods, replica_sets, daemon_sets) = futures::join!(
            self.client.list_pods(namespace),
            self.client.list_replica_sets(namespace),
            self.client.list_daemon_sets(namespace),
        );

        let mut consumers = Consumers::default();
        let pods = accept(&mut consumers, ListedKind::Pod, namespace, pods);
        let replica_sets = accept(&mut consumers, ListedKind::ReplicaSet, namespace, replica_sets);
        let daemon_sets = accept(&mut consumers, ListedKind::DaemonSet, namespace, daemon_sets);

        // Every listed ReplicaSet, for owner lookups from the pod path
        let known_replica_sets: HashMap<&str, &ReplicaSet> = replica_sets
            .iter()
            .flatten()
            .filter(|rs| in_namespace(&rs.metadata, namespace))
            .filter_map(|rs| Some((rs.metadata.name.as_deref()?, rs)))
            .collect();

        // Controller-template strategy
        for (name, rs) in &known_replica_sets {
            if rs.mounts_secret(secret_name) {
                debug!(namespace, secret = secret_name, replica_set = *name, "ReplicaSet template mounts credential");
                record_replica_set(&mut consumers, name, Some(*rs));
            }
        }
        for ds in daemon_sets.iter().flatten() {
            if !in_namespace(&ds.metadata, namespace) || !ds.mounts_secret(secret_name) {
                continue;
            }
            if let Some(name) = ds.metadata.name.as_deref() {
                debug!(namespace, secret = secret_name, daemon_set = name, "DaemonSet template mounts credential");
                consumers.daemon_sets.insert(name.to_string());
            }
        }

        // Live-pod strategy
        for pod in pods.iter().flatten() {
            if !in_namespace(&pod.metadata, namespace) || !pod_mounts_secret(pod, secret_name) {
                continue;
            }
            let pod_name = pod.metadata.name.as_deref().unwrap_or("unknown");
            for owner in owners(&pod.metadata) {
                match owner.workload_kind() {
                    Some(WorkloadKind::ReplicaSet) if owner.controller => {
                        debug!(namespace, secret = secret_name, pod = pod_name, replica_set = %owner.name, "Pod mounts credential");
                        let known = known_replica_sets.get(owner.name.as_str()).copied();
                        record_replica_set(&mut consumers, &owner.name, known);
                    }
                    Some(WorkloadKind::DaemonSet) => {
                        debug!(namespace, secret = secret_name, pod = pod_name, daemon_set = %owner.name, "Pod mounts credential");
                        consumers.daemon_sets.insert(owner.name);
                    }
                    _ => {}
                }
            }
        }

        consumers
    }
}

/// Unwrap a list result, recording the failure so only this kind is voided
fn accept<T>(
    consumers: &mut Consumers,
    kind: ListedKind,
    namespace: &str,
    result: Result<Vec<T>, ClientError>,
) -> Option<Vec<T>> {
    match result {
        Ok(items) => Some(items),
        Err(source) => {
            let error = DiscoveryListError {
                kind,
                namespace: namespace.to_string(),
                source,
            };
            warn!(namespace, kind = %kind, error = %error, "discovery.list_failed");
            observability::metrics::increment_discovery_errors(&kind.to_string());
            consumers.failures.push(DiscoveryFailure::from(&error));
            None
        }
    }
}

fn record_replica_set(consumers: &mut Consumers, name: &str, known: Option<&ReplicaSet>) {
    consumers.replica_sets.insert(name.to_string());
    if let Some(deployment) = deployment_for_replica_set(name, known) {
        consumers.deployments.insert(deployment);
    }
}

/// Deployment managing a ReplicaSet.
///
/// A known ReplicaSet with owner references answers from its controller owner, and
/// contributes nothing when that owner is not a Deployment. Unknown or ownerless
/// ReplicaSets fall back to the name heuristic.
fn deployment_for_replica_set(name: &str, known: Option<&ReplicaSet>) -> Option<String> {
    match known {
        Some(rs) if owners(&rs.metadata).next().is_some() => rs
            .controller_owner()
            .filter(|owner| owner.workload_kind() == Some(WorkloadKind::Deployment))
            .map(|owner| owner.name),
        _ => derive_deployment_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derive_deployment_name() {
        assert_eq!(derive_deployment_name("myapp-7d8f9c9c79"), Some("myapp".to_string()));
        assert_eq!(
            derive_deployment_name("payments-api-5c9b8d7f6d"),
            Some("payments-api".to_string())
        );
        assert_eq!(derive_deployment_name("myapp"), None);
        assert_eq!(derive_deployment_name("-abc"), None);
        assert_eq!(derive_deployment_name(""), None);
    }

    #[test]
    fn test_owner_reference_preferred_over_name() {
        let rs: ReplicaSet = serde_json::from_value(json!({
            "metadata": {
                "name": "api-v2-6b7c8d9e0f",
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": "api",
                    "uid": "1",
                    "controller": true
                }]
            }
        }))
        .unwrap();
        assert_eq!(
            deployment_for_replica_set("api-v2-6b7c8d9e0f", Some(&rs)),
            Some("api".to_string())
        );
    }

    #[test]
    fn test_non_deployment_owner_contributes_nothing() {
        let rs: ReplicaSet = serde_json::from_value(json!({
            "metadata": {
                "name": "rollout-abc12",
                "ownerReferences": [{
                    "apiVersion": "argoproj.io/v1alpha1",
                    "kind": "Rollout",
                    "name": "rollout",
                    "uid": "1",
                    "controller": true
                }]
            }
        }))
        .unwrap();
        assert_eq!(deployment_for_replica_set("rollout-abc12", Some(&rs)), None);
    }

    #[test]
    fn test_unknown_replica_set_uses_name() {
        assert_eq!(
            deployment_for_replica_set("web-7d8f9c9c79", None),
            Some("web".to_string())
        );
    }
}
