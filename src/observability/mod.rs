//! # Observability
//!
//! Prometheus metrics for the scan loop. Logging goes through `tracing`.

pub mod metrics;
