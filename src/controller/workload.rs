//! # Workloads
//!
//! A single view over the workload kinds that can mount a credential
//! (Deployment, ReplicaSet, DaemonSet) plus the Pod helpers the resolver needs.
//!
//! Only volume mounts are considered. Environment variable references are not.

use crate::controller::types::ObjectKey;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum WorkloadKind {
    Deployment,
    ReplicaSet,
    DaemonSet,
}

impl WorkloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::ReplicaSet => "ReplicaSet",
            Self::DaemonSet => "DaemonSet",
        }
    }

    /// Match an owner reference kind (case-insensitive)
    pub fn from_kind(kind: &str) -> Option<Self> {
        [Self::Deployment, Self::ReplicaSet, Self::DaemonSet]
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(kind))
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner reference reduced to what ownership walking needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub kind: String,
    pub name: String,
    pub controller: bool,
}

impl Owner {
    pub fn workload_kind(&self) -> Option<WorkloadKind> {
        WorkloadKind::from_kind(&self.kind)
    }
}

impl From<&OwnerReference> for Owner {
    fn from(reference: &OwnerReference) -> Self {
        Self {
            kind: reference.kind.clone(),
            name: reference.name.clone(),
            controller: reference.controller.unwrap_or(false),
        }
    }
}

/// All owner references of an object
pub fn owners(meta: &ObjectMeta) -> impl Iterator<Item = Owner> + '_ {
    meta.owner_references
        .iter()
        .flatten()
        .map(Owner::from)
}

/// Whether any volume mounts the named Secret
pub fn volumes_mount_secret(volumes: &[Volume], secret_name: &str) -> bool {
    volumes.iter().any(|volume| {
        volume
            .secret
            .as_ref()
            .and_then(|source| source.secret_name.as_deref())
            == Some(secret_name)
    })
}

fn template_volumes(template: Option<&PodTemplateSpec>) -> &[Volume] {
    template
        .and_then(|t| t.spec.as_ref())
        .and_then(|spec| spec.volumes.as_deref())
        .unwrap_or_default()
}

/// Shared shape of the workload kinds
pub trait Workload {
    fn kind(&self) -> WorkloadKind;

    fn meta(&self) -> &ObjectMeta;

    fn pod_template_volumes(&self) -> &[Volume];

    fn identity(&self) -> Option<ObjectKey> {
        ObjectKey::from_meta(self.meta())
    }

    /// The authoritative owner (controller flag set), if any
    fn controller_owner(&self) -> Option<Owner> {
        owners(self.meta()).find(|owner| owner.controller)
    }

    fn mounts_secret(&self, secret_name: &str) -> bool {
        volumes_mount_secret(self.pod_template_volumes(), secret_name)
    }
}

impl Workload for Deployment {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Deployment
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn pod_template_volumes(&self) -> &[Volume] {
        template_volumes(self.spec.as_ref().map(|spec| &spec.template))
    }
}

impl Workload for ReplicaSet {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::ReplicaSet
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn pod_template_volumes(&self) -> &[Volume] {
        template_volumes(self.spec.as_ref().and_then(|spec| spec.template.as_ref()))
    }
}

impl Workload for DaemonSet {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::DaemonSet
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn pod_template_volumes(&self) -> &[Volume] {
        template_volumes(self.spec.as_ref().map(|spec| &spec.template))
    }
}

/// Whether a live pod mounts the named Secret
pub fn pod_mounts_secret(pod: &Pod, secret_name: &str) -> bool {
    let volumes = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_deref())
        .unwrap_or_default();
    volumes_mount_secret(volumes, secret_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn replica_set(value: serde_json::Value) -> ReplicaSet {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_workload_kind_from_owner_kind() {
        assert_eq!(WorkloadKind::from_kind("ReplicaSet"), Some(WorkloadKind::ReplicaSet));
        assert_eq!(WorkloadKind::from_kind("replicaset"), Some(WorkloadKind::ReplicaSet));
        assert_eq!(WorkloadKind::from_kind("DaemonSet"), Some(WorkloadKind::DaemonSet));
        assert_eq!(WorkloadKind::from_kind("StatefulSet"), None);
    }

    #[test]
    fn test_replica_set_template_mount_and_owner() {
        let rs = replica_set(json!({
            "metadata": {
                "name": "web-7d8f9c9c79",
                "namespace": "shop",
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": "web",
                    "uid": "1",
                    "controller": true
                }]
            },
            "spec": {
                "selector": {},
                "template": {
                    "spec": {
                        "containers": [{ "name": "app" }],
                        "volumes": [{ "name": "creds", "secret": { "secretName": "tls" } }]
                    }
                }
            }
        }));

        assert_eq!(rs.kind(), WorkloadKind::ReplicaSet);
        assert_eq!(rs.identity(), Some(ObjectKey::new("shop", "web-7d8f9c9c79")));
        assert!(rs.mounts_secret("tls"));
        assert!(!rs.mounts_secret("other"));

        let owner = rs.controller_owner().unwrap();
        assert_eq!(owner.workload_kind(), Some(WorkloadKind::Deployment));
        assert_eq!(owner.name, "web");
    }

    #[test]
    fn test_env_reference_is_not_a_mount() {
        let rs = replica_set(json!({
            "metadata": { "name": "api-1", "namespace": "shop" },
            "spec": {
                "selector": {},
                "template": {
                    "spec": {
                        "containers": [{
                            "name": "app",
                            "envFrom": [{ "secretRef": { "name": "tls" } }]
                        }]
                    }
                }
            }
        }));
        assert!(!rs.mounts_secret("tls"));
        assert!(rs.controller_owner().is_none());
    }
}
