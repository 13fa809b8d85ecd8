//! Error types for hearth-health crate.
//!
//! Probe and recovery-action failures are normally turned into data
//! (check results and recovery attempts); these errors surface only where a
//! caller has to react.

use chrono::{DateTime, Utc};
use hearth_types::{ActionId, CheckId, ServiceId};
use thiserror::Error;

/// Errors that can occur during health monitoring and resilience operations.
#[derive(Debug, Error)]
pub enum HealthError {
    /// A health check with this id is already registered.
    #[error("health check already registered: {0}")]
    DuplicateId(CheckId),

    /// No health check registered under this id.
    #[error("health check not found: {0}")]
    NotFound(CheckId),

    /// Probe did not answer within its timeout.
    #[error("probe timed out for {check_id} after {timeout_ms}ms")]
    ProbeTimeout { check_id: CheckId, timeout_ms: u64 },

    /// Probe ran but could not produce a result.
    #[error("probe failed for {check_id}: {reason}")]
    ProbeFailed { check_id: CheckId, reason: String },

    /// Recovery action implementation raised an error.
    #[error("recovery action {action_id} failed: {reason}")]
    ActionExecution { action_id: ActionId, reason: String },

    /// No healthy instance could be selected.
    #[error("no healthy instance available for {0}")]
    NotAvailable(ServiceId),

    /// A recovery cycle is already running for this failure.
    #[error("recovery already in progress for {0}")]
    RecoveryInProgress(CheckId),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;

/// Error returned by a call guarded by a circuit breaker.
///
/// The operation's own error is passed through unchanged in `Operation`.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open and no fallback was supplied.
    #[error("service unavailable: circuit open for {service_id}")]
    ServiceUnavailable {
        service_id: ServiceId,
        /// When the breaker will next admit a trial call.
        retry_at: Option<DateTime<Utc>>,
    },

    /// The guarded operation itself failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CircuitError::ServiceUnavailable { .. })
    }

    /// Return the operation error, if this is one.
    pub fn into_operation(self) -> Option<E> {
        match self {
            CircuitError::Operation(e) => Some(e),
            CircuitError::ServiceUnavailable { .. } => None,
        }
    }
}
