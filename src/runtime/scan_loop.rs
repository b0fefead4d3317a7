//! # Scan Loop
//!
//! Drives scan cycles from a single task, so cycles never overlap.
//!
//! Cycles are triggered by the poll interval and, when enabled, by a metadata watch on
//! Secrets: applying an annotated Secret wakes the loop early. Triggers arriving while a
//! cycle runs collapse into one pending wake-up.

use crate::constants;
use crate::controller::server::ServerState;
use crate::controller::ScanCycle;
use crate::runtime::initialization::InitializationResult;
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use kube_runtime::watcher::{self, metadata_watcher, Event};
use kube_runtime::WatchStreamExt;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Timer,
    SecretWatch,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::SecretWatch => "secret-watch",
        }
    }
}

/// Run scan cycles until SIGINT/SIGTERM
pub async fn run_scan_loop(init: InitializationResult) -> Result<()> {
    let InitializationResult {
        client,
        scan,
        config,
        server_state,
    } = init;

    let trigger = Arc::new(Notify::new());
    let watch_handle = config.watch_secrets.then(|| {
        tokio::spawn(watch_secrets(
            client,
            config.namespace_scope.clone(),
            config.expiry_annotation_key.clone(),
            Arc::clone(&trigger),
        ))
    });

    // The first tick completes immediately, so the first cycle runs at startup
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let source = tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown signal received, stopping scan loop");
                break;
            }
            _ = interval.tick() => TriggerSource::Timer,
            () = trigger.notified() => TriggerSource::SecretWatch,
        };

        run_cycle(&scan, &server_state, source).await;
    }

    if let Some(handle) = watch_handle {
        handle.abort();
    }
    Ok(())
}

async fn run_cycle(scan: &ScanCycle, server_state: &ServerState, source: TriggerSource) {
    debug!(trigger = source.as_str(), "Starting scan cycle");
    let report = scan.run(chrono::Utc::now()).await;
    if report.list_error.is_none() {
        server_state.mark_ready();
    }
}

fn has_annotation(annotations: Option<&std::collections::BTreeMap<String, String>>, key: &str) -> bool {
    annotations.is_some_and(|a| a.contains_key(key))
}

/// Wake the scan loop whenever an annotated Secret is created or updated
async fn watch_secrets(
    client: Client,
    namespace_scope: Option<String>,
    annotation_key: String,
    trigger: Arc<Notify>,
) {
    let api: Api<Secret> = match namespace_scope.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    loop {
        info!("Starting Secret metadata watch");
        let mut events = metadata_watcher(api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Apply(meta)) => {
                    if has_annotation(meta.metadata.annotations.as_ref(), &annotation_key) {
                        debug!(
                            namespace = meta.metadata.namespace.as_deref().unwrap_or("default"),
                            name = meta.metadata.name.as_deref().unwrap_or("unknown"),
                            "Annotated Secret changed, triggering scan"
                        );
                        trigger.notify_one();
                    }
                }
                // The initial listing is covered by the startup cycle
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Secret watch error, retrying with backoff"),
            }
        }

        error!(
            "Secret watch stream ended, restarting in {}s",
            constants::DEFAULT_WATCH_RESTART_DELAY_SECS
        );
        tokio::time::sleep(std::time::Duration::from_secs(
            constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
        ))
        .await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
