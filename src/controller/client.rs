//! # Cluster Client
//!
//! The control-plane operations the scan needs, behind a trait so the resolver,
//! restart orchestrator and scan cycle receive the client as an explicit dependency
//! (tests substitute an in-memory implementation).
//!
//! `KubeClusterClient` is the kube-rs implementation. Every call is bounded by the
//! configured request timeout.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Control-plane call failures, classified for retry decisions
#[derive(Debug, Error)]
pub enum ClientError {
    /// The object changed since it was read (HTTP 409)
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("API error: {0}")]
    Api(String),
}

impl ClientError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<kube::Error> for ClientError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict(error.to_string()),
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound(error.to_string()),
            _ => Self::Api(error.to_string()),
        }
    }
}

/// Read and write operations consumed by the scan
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List Secrets in one namespace, or cluster-wide when `namespace` is `None`
    async fn list_secrets(&self, namespace: Option<&str>) -> Result<Vec<Secret>, ClientError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClientError>;

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, ClientError>;

    async fn list_daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ClientError>;

    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Deployment, ClientError>;

    /// Write a Deployment back. Must be rejected with `ClientError::Conflict` when
    /// `metadata.resourceVersion` no longer matches the stored object.
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClientError>;
}

/// kube-rs backed client
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    timeout: Duration,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        with_timeout(self.timeout, call).await
    }
}

/// Run an API call, failing with `ClientError::Timeout` once `timeout` elapses
pub(crate) async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(ClientError::from),
        Err(_) => Err(ClientError::Timeout(timeout)),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_secrets(&self, namespace: Option<&str>) -> Result<Vec<Secret>, ClientError> {
        let api: Api<Secret> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = self.bounded(api.list(&ListParams::default())).await?;
        Ok(list.items)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClientError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = self.bounded(api.list(&ListParams::default())).await?;
        Ok(list.items)
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, ClientError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = self.bounded(api.list(&ListParams::default())).await?;
        Ok(list.items)
    }

    async fn list_daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ClientError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let list = self.bounded(api.list(&ListParams::default())).await?;
        Ok(list.items)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClientError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.bounded(api.get(name)).await
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClientError> {
        let name = deployment
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClientError::Api("deployment has no name".to_string()))?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(crate::constants::CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        };
        // replace() sends metadata.resourceVersion, so a stale write is rejected with 409
        self.bounded(api.replace(name, &params, deployment)).await
    }
}
