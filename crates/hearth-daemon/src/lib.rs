//! Hearth daemon library
//!
//! This module provides the core components for the hearth daemon:
//! - Layered configuration
//! - Simulated stores behind the demo checks
//! - Daemon lifecycle management

pub mod config;
pub mod error;
pub mod runtime;
pub mod storage;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use runtime::Daemon;
pub use storage::SimulatedStore;
