//! Hearth Types - Core types for the self-healing resilience layer
//!
//! These types are shared between the resilience core (`hearth-health`) and
//! the hosting process (`hearth-daemon`).
//!
//! ## Key Concepts
//!
//! - **CheckId**: Identity of a registered health check (and of its failure)
//! - **ServiceId**: Identity of a guarded or load-balanced dependency
//! - **CriticalityLevel**: How much a failing check matters to overall health
//! - **ServiceInstance**: One endpoint of a load-balanced service

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod criticality;
pub mod ids;
pub mod instance;

pub use criticality::CriticalityLevel;
pub use ids::{ActionId, CheckId, InstanceId, ServiceId};
pub use instance::{InstanceHealth, ServiceInstance};
