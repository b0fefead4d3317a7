//! # Runtime Module
//!
//! Runtime components for the Secret Expiry Watcher: initialization and the scan loop.

pub mod initialization;
pub mod scan_loop;

pub use initialization::*;
pub use scan_loop::*;
