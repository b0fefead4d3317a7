//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, HTTP server startup and
//! Kubernetes client creation. A failure here is fatal to the process.

use crate::config::{load_config, ControllerConfig, ServerConfig};
use crate::constants;
use crate::controller::server::{start_server, ServerState};
use crate::controller::{KubeClusterClient, ScanCycle};
use crate::observability;
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the scan loop
pub struct InitializationResult {
    /// Kubernetes client (also used by the Secret watch)
    pub client: Client,
    /// Scan cycle bound to the kube-rs cluster client
    pub scan: Arc<ScanCycle>,
    pub config: ControllerConfig,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("scan", &self.scan)
            .field("config", &self.config)
            .field("server_state", &self.server_state)
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber, honouring `RUST_LOG`
pub fn init_tracing() {
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| constants::DEFAULT_LOG_FILTER.into()),
        )
        .try_init()
    {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Configure the rustls crypto provider.
/// Required for rustls 0.23+ when no default provider is selected via features.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }
}

/// Create a Kubernetes client from in-cluster config or the local kubeconfig
pub async fn create_client() -> Result<Client> {
    Client::try_default()
        .await
        .context("Failed to create Kubernetes client (no in-cluster config or kubeconfig)")
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Scan cycle setup
pub async fn initialize() -> Result<InitializationResult> {
    init_tracing();
    install_crypto_provider();

    info!("Starting Secret Expiry Watcher");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let (config, server_config) = load_config();
    info!(
        annotation_key = %config.expiry_annotation_key,
        poll_interval_secs = config.poll_interval.as_secs(),
        namespace_scope = config.namespace_scope.as_deref().unwrap_or("*"),
        naive_zone = ?config.naive_zone,
        watch_secrets = config.watch_secrets,
        dry_run = config.dry_run,
        "Loaded configuration"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_handle = {
        let state = Arc::clone(&server_state);
        let port = server_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {:#}", e);
            }
        })
    };

    // Probes must answer before the first (possibly slow) cycle starts
    wait_for_server_listening(&server_state, &server_handle, &server_config).await?;

    let client = create_client().await?;
    let cluster = Arc::new(KubeClusterClient::new(
        client.clone(),
        config.request_timeout(),
    ));
    let scan = Arc::new(ScanCycle::new(cluster, &config));

    info!("Controller initialized, starting scan loop...");

    Ok(InitializationResult {
        client,
        scan,
        config,
        server_state,
    })
}

/// Wait for the HTTP server to bind its listener
async fn wait_for_server_listening(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(server_config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(server_config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_listening.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
