//! # Secret Expiry Watcher
//!
//! A Kubernetes controller that restarts workloads mounting Secrets past their declared expiry.
//!
//! ## Overview
//!
//! On every cycle the controller:
//!
//! 1. **Lists Secrets** - cluster-wide or in `NAMESPACE_SCOPE`
//! 2. **Evaluates expiry** - from the `secret-watcher.expiry` annotation (RFC 3339, timestamp,
//!    date, or seconds after creation)
//! 3. **Resolves consumers** - Deployments, ReplicaSets and DaemonSets mounting an expired Secret
//! 4. **Restarts Deployments** - by stamping `kubectl.kubernetes.io/restartedAt`, retrying on
//!    write conflicts
//!
//! Cycles run on `POLL_INTERVAL` and, with `WATCH_SECRETS=true`, whenever an annotated Secret
//! changes. Prometheus metrics and probes are served on `METRICS_PORT`.

use anyhow::Result;
use secret_expiry_watcher::runtime::{initialize, run_scan_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;

    run_scan_loop(init_result).await?;

    Ok(())
}
