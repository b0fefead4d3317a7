//! # Controller Configuration
//!
//! Controller-level configuration loaded from environment variables (populated from a ConfigMap
//! via `envFrom` in the deployment).
//!
//! All configuration has sensible defaults. Unparseable values fall back to the default.

mod controller;
mod duration;
mod server;

pub use controller::ControllerConfig;
pub use duration::parse_kubernetes_duration;
pub use server::ServerConfig;

/// Load configuration from environment variables with defaults
pub fn load_config() -> (ControllerConfig, ServerConfig) {
    (ControllerConfig::from_env(), ServerConfig::from_env())
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, value = %raw, "Invalid value for {}, using default: {:?}", key, e);
                default
            }
        },
        Err(_) => default,
    }
}
