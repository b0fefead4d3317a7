//! # Metrics Module
//!
//! Prometheus metrics for monitoring the controller, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and text encoding
//! - `scan_metrics` - Cycle, evaluation, discovery and restart metrics

pub mod registry;
pub mod scan_metrics;

pub use registry::*;
pub use scan_metrics::*;
