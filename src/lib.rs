//! Secret Expiry Watcher Library
//!
//! Detects Kubernetes Secrets past the expiry declared in an annotation and rollout-restarts
//! the Deployments that mount them, so pods reload a fresh credential.
//!
//! The binaries (`secret-expiry-watcher` and `sewctl`) are thin wrappers around this library.

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod runtime;

pub use controller::*;
