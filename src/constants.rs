//! # Constants
//!
//! Default values and well-known annotation keys used across the controller.
//! Every default here can be overridden through the environment (see `config`).

/// Annotation on a Secret that declares when it expires
pub const DEFAULT_EXPIRY_ANNOTATION_KEY: &str = "secret-watcher.expiry";

/// Pod template annotation written to trigger a rollout restart.
/// Same key `kubectl rollout restart` uses.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Field manager / user agent name reported to the API server
pub const CONTROLLER_NAME: &str = "secret-expiry-watcher";

/// Default scan cadence (Kubernetes duration format)
pub const DEFAULT_POLL_INTERVAL: &str = "1m";

/// Maximum write attempts per Deployment restart (client-go `DefaultRetry` uses 5 steps)
pub const DEFAULT_RESTART_MAX_ATTEMPTS: u32 = 5;

/// First backoff between conflicting restart writes (milliseconds)
pub const DEFAULT_RESTART_RETRY_BASE_MS: u64 = 10;

/// Cap for the restart conflict backoff (milliseconds)
pub const DEFAULT_RESTART_RETRY_MAX_MS: u64 = 1000;

/// Timeout applied to every control-plane request (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP port for metrics and probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// How long to wait for the HTTP server to bind (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Readiness poll interval while waiting for the HTTP server (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Delay before restarting the Secret watch after a stream error (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default tracing filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "secret_expiry_watcher=info";
