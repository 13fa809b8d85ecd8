//! # Hearth Health - Self-Healing and Resilience for the Hotel Platform
//!
//! This crate keeps the platform's backing services observable and
//! recoverable from inside the application process.
//!
//! ## Key Components
//!
//! - [`HealthCheckRegistry`]: registered checks, each a probe plus metadata
//!   and recovery actions
//! - [`HealthCheckScheduler`]: periodic, non-overlapping check runs
//! - [`FailureTracker`]: at most one active [`SystemFailure`] per check
//! - [`RecoveryOrchestrator`]: ranked, cooldown-limited recovery actions with
//!   verification and escalation
//! - [`CircuitBreakerBank`]: per-service circuit breakers around outbound
//!   calls
//! - [`InstanceSelector`]: healthy-instance selection for service pools
//! - [`HealthReporter`]: on-demand [`SystemHealthReport`]s
//! - [`ResilienceManager`]: the context object that owns all of the above
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hearth_health::{
//!     probe_fn, CheckResult, HealthCheck, ResilienceConfig, ResilienceManager,
//!     TracingEventSink,
//! };
//! use hearth_types::{CriticalityLevel, ServiceId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Arc::new(ResilienceManager::new(
//!     ResilienceConfig::default(),
//!     Arc::new(TracingEventSink),
//! )?);
//!
//! manager.register_health_check(
//!     HealthCheck::new(
//!         "reservations-db",
//!         "Reservations database",
//!         "database",
//!         probe_fn(|| async { Ok(CheckResult::healthy()) }),
//!     )
//!     .with_criticality(CriticalityLevel::Critical),
//! )?;
//!
//! manager.configure_circuit_breaker("payments", None)?;
//! let charged = manager
//!     .execute_with_circuit_breaker(&ServiceId::new("payments"), || async {
//!         Ok::<_, String>("charged")
//!     })
//!     .await?;
//!
//! manager.start();
//! let report = manager.system_health_report().await;
//! println!("{} ({})", report.overall, charged);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod balancer;
pub mod check;
pub mod config;
pub mod error;
pub mod events;
pub mod failures;
pub mod maintenance;
pub mod manager;
pub mod probes;
pub mod registry;
pub mod report;
pub mod resilience;
pub mod scheduler;
pub mod tasks;

// Re-export main types
pub use balancer::{InstanceSelector, LoadBalancerConfig, LoadBalancingAlgorithm};
pub use check::HealthCheck;
pub use config::{
    CircuitBreakerConfig, MaintenanceConfig, RecoveryConfig, ResilienceConfig, SchedulerConfig,
};
pub use error::{CircuitError, HealthError, HealthResult};
pub use events::{
    BroadcastEventSink, EventSeverity, EventSink, FanoutEventSink, MemoryEventSink,
    NoOpEventSink, ResilienceEvent, ResilienceEventEnvelope, TracingEventSink,
};
pub use failures::{FailureTracker, RecordOutcome, SystemFailure};
pub use maintenance::{MaintenanceTask, SweepSummary};
pub use manager::ResilienceManager;
pub use probes::{probe_fn, CheckResult, Probe, Store, StorePingProbe};
pub use registry::HealthCheckRegistry;
pub use report::{
    ComponentHealth, HealthReporter, OverallStatus, Recommendation, SystemHealthReport,
};
pub use resilience::{
    ActionImplementation, ActionOutcome, ActionStats, AttemptResult, CircuitBreaker,
    CircuitBreakerBank, CircuitBreakerSnapshot, CircuitState, RecoveryAction,
    RecoveryActionKind, RecoveryAttempt, RecoveryConditions, RecoveryOrchestrator,
};
pub use scheduler::HealthCheckScheduler;
pub use tasks::TaskSet;
