//! In-memory cluster used by the integration tests.
//!
//! Holds Secrets, Pods, ReplicaSets, DaemonSets and Deployments, counts every call, and
//! can be told to fail a list call or reject Deployment writes with conflicts.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Pod, Secret};
use secret_expiry_watcher::controller::{ClientError, ClusterClient, Clock};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub const ANNOTATION: &str = "secret-watcher.expiry";
pub const CREATED_AT: &str = "2025-01-01T00:00:00Z";

/// List calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListCall {
    Secrets,
    Pods,
    ReplicaSets,
    DaemonSets,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallCounts {
    pub list_secrets: usize,
    pub list_pods: usize,
    pub list_replica_sets: usize,
    pub list_daemon_sets: usize,
    pub get_deployment: usize,
    pub replace_deployment: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.list_secrets
            + self.list_pods
            + self.list_replica_sets
            + self.list_daemon_sets
            + self.get_deployment
            + self.replace_deployment
    }
}

#[derive(Default)]
struct State {
    secrets: Vec<Secret>,
    pods: Vec<Pod>,
    replica_sets: Vec<ReplicaSet>,
    daemon_sets: Vec<DaemonSet>,
    deployments: BTreeMap<(String, String), Deployment>,
    failing: HashSet<ListCall>,
    conflicts: HashMap<(String, String), u32>,
    always_conflict: HashSet<(String, String)>,
    calls: CallCounts,
    writes: Vec<Deployment>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster state poisoned")
    }

    pub fn add_secret(&self, secret: Secret) {
        self.state().secrets.push(secret);
    }

    pub fn set_secret_annotation(&self, namespace: &str, name: &str, value: Option<&str>) {
        let mut state = self.state();
        let secret = state
            .secrets
            .iter_mut()
            .find(|s| {
                s.metadata.namespace.as_deref() == Some(namespace)
                    && s.metadata.name.as_deref() == Some(name)
            })
            .expect("secret exists");
        let annotations = secret.metadata.annotations.get_or_insert_with(BTreeMap::new);
        match value {
            Some(value) => {
                annotations.insert(ANNOTATION.to_string(), value.to_string());
            }
            None => {
                annotations.remove(ANNOTATION);
            }
        }
    }

    pub fn remove_secret(&self, namespace: &str, name: &str) {
        self.state().secrets.retain(|s| {
            s.metadata.namespace.as_deref() != Some(namespace)
                || s.metadata.name.as_deref() != Some(name)
        });
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state().pods.push(pod);
    }

    pub fn add_replica_set(&self, rs: ReplicaSet) {
        self.state().replica_sets.push(rs);
    }

    pub fn add_daemon_set(&self, ds: DaemonSet) {
        self.state().daemon_sets.push(ds);
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        let key = (
            deployment.metadata.namespace.clone().unwrap_or_default(),
            deployment.metadata.name.clone().unwrap_or_default(),
        );
        self.state().deployments.insert(key, deployment);
    }

    pub fn fail_list(&self, call: ListCall) {
        self.state().failing.insert(call);
    }

    pub fn heal_list(&self, call: ListCall) {
        self.state().failing.remove(&call);
    }

    /// Reject the next `count` writes to this Deployment as if another writer got there first
    pub fn conflict_next_writes(&self, namespace: &str, name: &str, count: u32) {
        self.state()
            .conflicts
            .insert((namespace.to_string(), name.to_string()), count);
    }

    pub fn conflict_forever(&self, namespace: &str, name: &str) {
        self.state()
            .always_conflict
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }

    /// Successful Deployment writes, in order
    pub fn writes(&self) -> Vec<Deployment> {
        self.state().writes.clone()
    }

    pub fn written_names(&self) -> Vec<String> {
        self.writes()
            .iter()
            .filter_map(|d| d.metadata.name.clone())
            .collect()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current restart annotation on a Deployment's pod template
    pub fn restarted_at(&self, namespace: &str, name: &str) -> Option<String> {
        restarted_at(&self.deployment(namespace, name)?)
    }

    fn check_list(state: &State, call: ListCall, namespace: Option<&str>) -> Result<(), ClientError> {
        if state.failing.contains(&call) {
            return Err(ClientError::Api(format!(
                "injected failure listing {call:?} in {}",
                namespace.unwrap_or("all namespaces")
            )));
        }
        Ok(())
    }
}

fn in_namespace(namespace: Option<&String>, wanted: &str) -> bool {
    namespace.is_some_and(|ns| ns == wanted)
}

fn bump(resource_version: Option<&String>) -> String {
    let current: u64 = resource_version.and_then(|rv| rv.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_secrets(&self, namespace: Option<&str>) -> Result<Vec<Secret>, ClientError> {
        let mut state = self.state();
        state.calls.list_secrets += 1;
        Self::check_list(&state, ListCall::Secrets, namespace)?;
        Ok(state
            .secrets
            .iter()
            .filter(|s| namespace.is_none_or(|ns| in_namespace(s.metadata.namespace.as_ref(), ns)))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClientError> {
        let mut state = self.state();
        state.calls.list_pods += 1;
        Self::check_list(&state, ListCall::Pods, Some(namespace))?;
        Ok(state
            .pods
            .iter()
            .filter(|p| in_namespace(p.metadata.namespace.as_ref(), namespace))
            .cloned()
            .collect())
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, ClientError> {
        let mut state = self.state();
        state.calls.list_replica_sets += 1;
        Self::check_list(&state, ListCall::ReplicaSets, Some(namespace))?;
        Ok(state
            .replica_sets
            .iter()
            .filter(|rs| in_namespace(rs.metadata.namespace.as_ref(), namespace))
            .cloned()
            .collect())
    }

    async fn list_daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ClientError> {
        let mut state = self.state();
        state.calls.list_daemon_sets += 1;
        Self::check_list(&state, ListCall::DaemonSets, Some(namespace))?;
        Ok(state
            .daemon_sets
            .iter()
            .filter(|ds| in_namespace(ds.metadata.namespace.as_ref(), namespace))
            .cloned()
            .collect())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClientError> {
        let mut state = self.state();
        state.calls.get_deployment += 1;
        state
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("deployments \"{name}\" not found")))
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClientError> {
        let mut state = self.state();
        state.calls.replace_deployment += 1;

        let name = deployment.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());

        let forced = state.always_conflict.contains(&key)
            || state.conflicts.get_mut(&key).is_some_and(|remaining| {
                let conflict = *remaining > 0;
                *remaining = remaining.saturating_sub(1);
                conflict
            });

        let Some(stored) = state.deployments.get_mut(&key) else {
            return Err(ClientError::NotFound(format!("deployments \"{name}\" not found")));
        };

        if forced {
            // Someone else wrote in between
            stored.metadata.resource_version = Some(bump(stored.metadata.resource_version.as_ref()));
            return Err(ClientError::Conflict(format!(
                "Operation cannot be fulfilled on deployments \"{name}\": the object has been modified"
            )));
        }

        if stored.metadata.resource_version != deployment.metadata.resource_version {
            return Err(ClientError::Conflict(format!(
                "resourceVersion mismatch for deployments \"{name}\""
            )));
        }

        let mut written = deployment.clone();
        written.metadata.resource_version = Some(bump(stored.metadata.resource_version.as_ref()));
        *stored = written.clone();
        state.writes.push(written.clone());
        Ok(written)
    }
}

/// Clock returning a fixed sequence of instants, repeating the last one
pub struct SequenceClock {
    instants: Mutex<VecDeque<DateTime<Utc>>>,
}

impl SequenceClock {
    pub fn new(instants: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        Self {
            instants: Mutex::new(instants.into_iter().collect()),
        }
    }
}

impl Clock for SequenceClock {
    fn now(&self) -> DateTime<Utc> {
        let mut instants = self.instants.lock().expect("clock poisoned");
        if instants.len() > 1 {
            instants.pop_front().expect("non-empty")
        } else {
            *instants.front().expect("clock has at least one instant")
        }
    }
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid RFC 3339")
        .with_timezone(&Utc)
}

pub fn restarted_at(deployment: &Deployment) -> Option<String> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get("kubectl.kubernetes.io/restartedAt")
        .cloned()
}

fn secret_volumes(secret: Option<&str>) -> Value {
    match secret {
        Some(name) => json!([{ "name": "creds", "secret": { "secretName": name } }]),
        None => json!([{ "name": "scratch", "emptyDir": {} }]),
    }
}

fn owner_refs(owner: Option<(&str, &str)>) -> Value {
    match owner {
        Some((kind, name)) => json!([{
            "apiVersion": "apps/v1",
            "kind": kind,
            "name": name,
            "uid": format!("uid-{name}"),
            "controller": true
        }]),
        None => json!([]),
    }
}

fn pod_template(app: &str, secret: Option<&str>) -> Value {
    json!({
        "metadata": { "labels": { "app": app } },
        "spec": {
            "containers": [{ "name": "app", "image": "busybox" }],
            "volumes": secret_volumes(secret)
        }
    })
}

/// Secret with the expiry annotation (when given), created at `CREATED_AT`
pub fn secret(namespace: &str, name: &str, expiry: Option<&str>) -> Secret {
    secret_created_at(namespace, name, expiry, CREATED_AT)
}

pub fn secret_created_at(
    namespace: &str,
    name: &str,
    expiry: Option<&str>,
    created_at: &str,
) -> Secret {
    let annotations = match expiry {
        Some(value) => json!({ "secret-watcher.expiry": value }),
        None => json!({}),
    };
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "creationTimestamp": created_at,
            "annotations": annotations
        }
    }))
    .expect("valid Secret")
}

/// Pod mounting `secret`, controlled by `owner` (kind, name)
pub fn pod(namespace: &str, name: &str, secret: Option<&str>, owner: Option<(&str, &str)>) -> Pod {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "ownerReferences": owner_refs(owner)
        },
        "spec": {
            "containers": [{ "name": "app", "image": "busybox" }],
            "volumes": secret_volumes(secret)
        }
    }))
    .expect("valid Pod")
}

/// ReplicaSet whose template mounts `secret`, controlled by `deployment`
pub fn replica_set(
    namespace: &str,
    name: &str,
    secret: Option<&str>,
    deployment: Option<&str>,
) -> ReplicaSet {
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "ReplicaSet",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "ownerReferences": owner_refs(deployment.map(|d| ("Deployment", d)))
        },
        "spec": {
            "selector": { "matchLabels": { "app": name } },
            "template": pod_template(name, secret)
        }
    }))
    .expect("valid ReplicaSet")
}

pub fn daemon_set(namespace: &str, name: &str, secret: Option<&str>) -> DaemonSet {
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "DaemonSet",
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "selector": { "matchLabels": { "app": name } },
            "template": pod_template(name, secret)
        }
    }))
    .expect("valid DaemonSet")
}

pub fn deployment(namespace: &str, name: &str) -> Deployment {
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace, "resourceVersion": "1" },
        "spec": {
            "selector": { "matchLabels": { "app": name } },
            "template": pod_template(name, None)
        }
    }))
    .expect("valid Deployment")
}
