//! Circuit breaker pattern for resilience.
//!
//! Prevents cascading failures by tracking consecutive failures of a guarded
//! service and short-circuiting calls while it recovers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hearth_types::ServiceId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::events::{EventSink, ResilienceEvent};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,

    /// Circuit is open, requests are short-circuited.
    Open,

    /// Circuit is admitting trial calls to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Decision taken for an incoming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Run the operation.
    Allowed,

    /// Run the operation as a half-open trial.
    Trial,

    /// Short-circuit; the breaker is open.
    Rejected { retry_at: Option<DateTime<Utc>> },
}

/// Mutable breaker state, guarded by one lock per service.
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<DateTime<Utc>>,
    next_retry_at: Option<Instant>,
    next_retry_wall: Option<DateTime<Utc>>,
    last_transition: DateTime<Utc>,
}

/// Circuit breaker for a single service.
///
/// Transitions:
/// - Closed: calls pass; `failure_threshold` consecutive failures open it
/// - Open: calls are rejected until `open_duration` elapses, then the next
///   call half-opens the circuit and runs as a trial
/// - Half-Open: `half_open_success_threshold` successes close it, any
///   failure re-opens it
pub struct CircuitBreaker {
    service_id: ServiceId,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    events: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    /// Create a new closed circuit breaker for a service.
    pub fn new(
        service_id: ServiceId,
        config: CircuitBreakerConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            service_id,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                next_retry_at: None,
                next_retry_wall: None,
                last_transition: Utc::now(),
            }),
            events,
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, without applying the open timeout.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Decide whether a call may proceed.
    ///
    /// An open breaker whose retry time has passed moves to half-open here,
    /// so the calling request becomes the trial call.
    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen => Admission::Trial,
            CircuitState::Open => {
                let due = inner
                    .next_retry_at
                    .map(|retry_at| Instant::now() >= retry_at)
                    .unwrap_or(true);

                if due {
                    info!(
                        service_id = %self.service_id,
                        "Circuit breaker transitioning to half-open after timeout"
                    );
                    self.transition_to(&mut inner, CircuitState::HalfOpen);
                    Admission::Trial
                } else {
                    Admission::Rejected {
                        retry_at: inner.next_retry_wall,
                    }
                }
            }
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;

                if inner.success_count >= self.config.half_open_success_threshold {
                    info!(
                        service_id = %self.service_id,
                        successes = inner.success_count,
                        "Circuit breaker closing after successful trials"
                    );
                    self.transition_to(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit re-opened
                debug!(
                    service_id = %self.service_id,
                    "Success recorded while circuit open"
                );
            }
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;

                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        service_id = %self.service_id,
                        failures = inner.failure_count,
                        "Circuit breaker opening due to failures"
                    );
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                warn!(
                    service_id = %self.service_id,
                    "Circuit breaker re-opening after failed trial"
                );
                self.transition_to(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit to a specific state.
    pub fn force_state(&self, new_state: CircuitState) {
        let mut inner = self.inner.lock();
        info!(
            service_id = %self.service_id,
            old_state = %inner.state,
            new_state = %new_state,
            "Circuit breaker state forced"
        );
        self.transition_to(&mut inner, new_state);
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.force_state(CircuitState::Closed);
    }

    /// Point-in-time view of the breaker.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            service_id: self.service_id.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure: inner.last_failure,
            next_retry_at: inner.next_retry_wall,
            last_transition: inner.last_transition,
            configuration: self.config.clone(),
        }
    }

    /// Transition to a new state, resetting counters as needed.
    fn transition_to(&self, inner: &mut BreakerInner, new_state: CircuitState) {
        let old_state = inner.state;
        inner.state = new_state;
        inner.last_transition = Utc::now();

        match new_state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.next_retry_at = None;
                inner.next_retry_wall = None;
            }
            CircuitState::Open => {
                inner.success_count = 0;
                inner.next_retry_at = Some(Instant::now() + self.config.open_duration);
                inner.next_retry_wall = chrono::Duration::from_std(self.config.open_duration)
                    .ok()
                    .map(|d| Utc::now() + d);
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
            }
        }

        if old_state == new_state {
            return;
        }

        let event = match new_state {
            CircuitState::Open => ResilienceEvent::CircuitOpened {
                service_id: self.service_id.clone(),
                failure_count: inner.failure_count,
                retry_at: inner.next_retry_wall,
            },
            CircuitState::HalfOpen => ResilienceEvent::CircuitHalfOpened {
                service_id: self.service_id.clone(),
            },
            CircuitState::Closed => ResilienceEvent::CircuitClosed {
                service_id: self.service_id.clone(),
            },
        };
        self.events.emit(event);
    }
}

/// Point-in-time view of a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub service_id: ServiceId,
    pub state: CircuitState,
    pub failure_count: u32,

    /// Successful trials so far; meaningful only while half-open.
    pub success_count: u32,

    pub last_failure: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_transition: DateTime<Utc>,
    pub configuration: CircuitBreakerConfig,
}
