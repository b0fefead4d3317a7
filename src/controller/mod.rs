//! # Controller
//!
//! Expiry detection and remediation.
//!
//! - `expiry` - annotation parsing and expiry evaluation
//! - `workload` - shared view over Deployments, ReplicaSets and DaemonSets
//! - `client` - control-plane seam and its kube-rs implementation
//! - `resolver` - which workloads mount a credential
//! - `restart` - conflict-safe rollout restarts
//! - `cycle` - one scan pass tying the above together
//! - `server` - metrics and probe endpoints

pub mod backoff;
pub mod client;
pub mod cycle;
pub mod expiry;
pub mod resolver;
pub mod restart;
pub mod server;
pub mod types;
pub mod workload;

pub use client::{ClientError, ClusterClient, KubeClusterClient};
pub use cycle::{CredentialOutcome, CycleReport, RestartStatus, ScanCycle, ScanSettings};
pub use expiry::{ExpiryError, ExpiryEvaluator, ExpiryRecord, NaiveZone};
pub use resolver::{derive_deployment_name, ConsumerResolver, Consumers};
pub use restart::{Clock, RestartError, RestartOrchestrator, RetryPolicy, SystemClock};
pub use types::{Credential, ObjectKey};
