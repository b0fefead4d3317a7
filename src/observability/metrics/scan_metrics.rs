//! # Scan Metrics
//!
//! Metrics for scan cycles: credentials evaluated, expiries detected, format errors,
//! discovery failures and rollout restarts.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge};
use std::sync::LazyLock;

// Cycle metrics
static CYCLES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("secret_expiry_cycles_total", "Total number of scan cycles")
        .expect("Failed to create CYCLES_TOTAL metric - this should never happen")
});

static CYCLE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "secret_expiry_cycle_duration_seconds",
            "Duration of scan cycles in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create CYCLE_DURATION metric - this should never happen")
});

static LAST_CYCLE_TIMESTAMP: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "secret_expiry_last_cycle_timestamp_seconds",
        "Unix timestamp of the last completed scan cycle",
    )
    .expect("Failed to create LAST_CYCLE_TIMESTAMP metric - this should never happen")
});

// Evaluation metrics
static CREDENTIALS_EVALUATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_expiry_credentials_evaluated_total",
        "Total number of credentials carrying an expiry annotation that were evaluated",
    )
    .expect("Failed to create CREDENTIALS_EVALUATED_TOTAL metric - this should never happen")
});

static CREDENTIALS_EXPIRED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_expiry_credentials_expired_total",
        "Total number of expired credentials detected",
    )
    .expect("Failed to create CREDENTIALS_EXPIRED_TOTAL metric - this should never happen")
});

static FORMAT_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_expiry_format_errors_total",
        "Total number of unparseable expiry annotations",
    )
    .expect("Failed to create FORMAT_ERRORS_TOTAL metric - this should never happen")
});

// Discovery metrics
static DISCOVERY_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secret_expiry_discovery_errors_total",
            "Total number of failed list calls during consumer discovery",
        ),
        &["kind"],
    )
    .expect("Failed to create DISCOVERY_ERRORS_TOTAL metric - this should never happen")
});

// Restart metrics
static RESTARTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_expiry_restarts_total",
        "Total number of successful Deployment rollout restarts",
    )
    .expect("Failed to create RESTARTS_TOTAL metric - this should never happen")
});

static RESTART_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_expiry_restart_failures_total",
        "Total number of Deployment restarts that failed",
    )
    .expect("Failed to create RESTART_FAILURES_TOTAL metric - this should never happen")
});

static RESTART_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_expiry_restart_conflicts_total",
        "Total number of restart writes rejected because the Deployment changed",
    )
    .expect("Failed to create RESTART_CONFLICTS_TOTAL metric - this should never happen")
});

/// Register scan metrics with the registry
pub(crate) fn register_scan_metrics() -> Result<()> {
    REGISTRY.register(Box::new(CYCLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLE_DURATION.clone()))?;
    REGISTRY.register(Box::new(LAST_CYCLE_TIMESTAMP.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_EVALUATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_EXPIRED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FORMAT_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISCOVERY_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESTART_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESTART_CONFLICTS_TOTAL.clone()))?;
    Ok(())
}

// Public functions for scan metrics

pub fn increment_cycles() {
    CYCLES_TOTAL.inc();
}

pub fn observe_cycle_duration(duration: f64) {
    CYCLE_DURATION.observe(duration);
}

pub fn set_last_cycle_timestamp(timestamp: i64) {
    LAST_CYCLE_TIMESTAMP.set(timestamp);
}

pub fn increment_credentials_evaluated() {
    CREDENTIALS_EVALUATED_TOTAL.inc();
}

pub fn increment_credentials_expired() {
    CREDENTIALS_EXPIRED_TOTAL.inc();
}

pub fn increment_format_errors() {
    FORMAT_ERRORS_TOTAL.inc();
}

pub fn increment_discovery_errors(kind: &str) {
    DISCOVERY_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_restarts() {
    RESTARTS_TOTAL.inc();
}

pub fn increment_restart_failures() {
    RESTART_FAILURES_TOTAL.inc();
}

pub fn increment_restart_conflicts() {
    RESTART_CONFLICTS_TOTAL.inc();
}
