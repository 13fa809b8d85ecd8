//! Recovery actions for resilience.
//!
//! Defines the automated actions a health check can register to repair its
//! component, and the records kept for every attempt.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_types::{ActionId, ServiceId};
use serde::{Deserialize, Serialize};

use super::bank::CircuitBreakerBank;

/// Category of a recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryActionKind {
    Restart,
    Failover,
    CacheClear,
    ResourceCleanup,
    CircuitBreakerReset,
    RateLimit,
    Alert,
    Custom,
}

impl fmt::Display for RecoveryActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryActionKind::Restart => "restart",
            RecoveryActionKind::Failover => "failover",
            RecoveryActionKind::CacheClear => "cache-clear",
            RecoveryActionKind::ResourceCleanup => "resource-cleanup",
            RecoveryActionKind::CircuitBreakerReset => "circuit-breaker-reset",
            RecoveryActionKind::RateLimit => "rate-limit",
            RecoveryActionKind::Alert => "alert",
            RecoveryActionKind::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

/// Limits on how often an action may run against one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConditions {
    /// Span over which attempts are counted.
    pub cooldown_window: Duration,

    /// Attempts allowed inside the window.
    pub max_attempts_per_window: u32,
}

/// What a recovery action reported after running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Trait for recovery action implementations.
///
/// Implementations must be safe to invoke repeatedly: the orchestrator may
/// run the same action again once its cooldown allows.
#[async_trait]
pub trait ActionImplementation: Send + Sync {
    /// Run the action. `Err` means the action itself raised.
    async fn execute(&self) -> Result<ActionOutcome, String>;
}

/// A recovery action registered on a health check.
#[derive(Clone)]
pub struct RecoveryAction {
    pub id: ActionId,
    pub name: String,
    pub kind: RecoveryActionKind,

    /// Only automated actions are invoked by the orchestrator.
    pub automated: bool,

    /// Cooldown limits; the configured defaults apply when absent.
    pub conditions: Option<RecoveryConditions>,

    /// Expected downtime, used to break ranking ties (cheaper first).
    pub estimated_downtime_secs: u64,

    implementation: Arc<dyn ActionImplementation>,
}

impl RecoveryAction {
    /// Create a new automated action with no explicit conditions.
    pub fn new(
        id: impl Into<ActionId>,
        name: impl Into<String>,
        kind: RecoveryActionKind,
        implementation: Arc<dyn ActionImplementation>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            automated: true,
            conditions: None,
            estimated_downtime_secs: 0,
            implementation,
        }
    }

    /// Create an action from an async closure.
    pub fn from_fn<F, Fut>(
        id: impl Into<ActionId>,
        name: impl Into<String>,
        kind: RecoveryActionKind,
        action_fn: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionOutcome, String>> + Send + 'static,
    {
        Self::new(id, name, kind, Arc::new(FnAction { action_fn }))
    }

    /// Built-in action that resets a circuit breaker in the bank.
    pub fn circuit_breaker_reset(
        id: impl Into<ActionId>,
        bank: Arc<CircuitBreakerBank>,
        service_id: ServiceId,
    ) -> Self {
        let name = format!("Reset circuit breaker for {}", service_id);
        Self::new(
            id,
            name,
            RecoveryActionKind::CircuitBreakerReset,
            Arc::new(BreakerResetAction { bank, service_id }),
        )
    }

    /// Mark the action as operator-only.
    pub fn manual(mut self) -> Self {
        self.automated = false;
        self
    }

    pub fn with_conditions(mut self, cooldown_window: Duration, max_attempts_per_window: u32) -> Self {
        self.conditions = Some(RecoveryConditions {
            cooldown_window,
            max_attempts_per_window,
        });
        self
    }

    pub fn with_estimated_downtime(mut self, secs: u64) -> Self {
        self.estimated_downtime_secs = secs;
        self
    }

    /// Run the implementation.
    pub async fn execute(&self) -> Result<ActionOutcome, String> {
        self.implementation.execute().await
    }
}

impl fmt::Debug for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryAction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("automated", &self.automated)
            .field("conditions", &self.conditions)
            .field("estimated_downtime_secs", &self.estimated_downtime_secs)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

struct FnAction<F> {
    action_fn: F,
}

#[async_trait]
impl<F, Fut> ActionImplementation for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionOutcome, String>> + Send,
{
    async fn execute(&self) -> Result<ActionOutcome, String> {
        (self.action_fn)().await
    }
}

struct BreakerResetAction {
    bank: Arc<CircuitBreakerBank>,
    service_id: ServiceId,
}

#[async_trait]
impl ActionImplementation for BreakerResetAction {
    async fn execute(&self) -> Result<ActionOutcome, String> {
        if self.bank.reset(&self.service_id) {
            Ok(ActionOutcome::success(format!(
                "circuit breaker for {} reset to closed",
                self.service_id
            )))
        } else {
            Err(format!("no circuit breaker configured for {}", self.service_id))
        }
    }
}

/// Result recorded for one recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptResult {
    /// Action succeeded and the component verified healthy.
    Success,
    /// Action raised, reported failure, or timed out.
    Failed,
    /// Action reported success but the component was still unhealthy.
    Partial,
}

impl fmt::Display for AttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptResult::Success => write!(f, "success"),
            AttemptResult::Failed => write!(f, "failed"),
            AttemptResult::Partial => write!(f, "partial"),
        }
    }
}

/// One entry in a failure's recovery history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub action_id: ActionId,
    pub action_name: String,
    pub attempted_at: DateTime<Utc>,
    pub result: AttemptResult,
    pub message: String,
}

impl RecoveryAttempt {
    pub fn new(action: &RecoveryAction, result: AttemptResult, message: impl Into<String>) -> Self {
        Self {
            action_id: action.id.clone(),
            action_name: action.name.clone(),
            attempted_at: Utc::now(),
            result,
            message: message.into(),
        }
    }
}

/// Historical success statistics for one action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStats {
    pub attempts: u64,
    pub successes: u64,
}

impl ActionStats {
    pub fn record(&mut self, result: AttemptResult) {
        self.attempts += 1;
        if result == AttemptResult::Success {
            self.successes += 1;
        }
    }

    /// Success rate, or `prior` when there is no history.
    pub fn success_rate(&self, prior: f64) -> f64 {
        if self.attempts == 0 {
            prior
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}
