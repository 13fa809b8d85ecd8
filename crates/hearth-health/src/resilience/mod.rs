//! Resilience patterns for Hearth health management.
//!
//! Provides circuit breakers, recovery actions, and the orchestrator that
//! runs recovery actions against detected failures.

mod bank;
mod circuit_breaker;
mod orchestrator;
mod recovery;

pub use bank::CircuitBreakerBank;
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use orchestrator::RecoveryOrchestrator;
pub use recovery::{
    ActionImplementation, ActionOutcome, ActionStats, AttemptResult, RecoveryAction,
    RecoveryActionKind, RecoveryAttempt, RecoveryConditions,
};
