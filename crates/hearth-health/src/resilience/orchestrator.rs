//! Recovery orchestrator.
//!
//! Runs a failing check's automated recovery actions, best first, until one
//! of them brings the check back to healthy or every candidate is used up.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hearth_types::ActionId;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::recovery::{
    ActionStats, AttemptResult, RecoveryAction, RecoveryAttempt, RecoveryConditions,
};
use crate::check::HealthCheck;
use crate::config::RecoveryConfig;
use crate::error::{HealthError, HealthResult};
use crate::events::{EventSink, ResilienceEvent};
use crate::failures::{FailureTracker, RecordOutcome, SystemFailure};
use crate::registry::HealthCheckRegistry;

/// Cooldown bookkeeping key: component plus action.
type CooldownKey = (String, ActionId);

/// Attempt timestamps for one action against one component.
#[derive(Debug)]
struct CooldownLog {
    window: Duration,
    attempts: VecDeque<Instant>,
}

impl CooldownLog {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.attempts.front() {
            if now.duration_since(*oldest) >= self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Executes recovery actions against detected failures.
pub struct RecoveryOrchestrator {
    registry: Arc<HealthCheckRegistry>,
    tracker: Arc<FailureTracker>,
    config: RecoveryConfig,

    /// Timeout used for the verification probe.
    probe_timeout: Duration,

    /// Final-result statistics per action id.
    stats: DashMap<ActionId, ActionStats>,

    cooldowns: DashMap<CooldownKey, CooldownLog>,

    events: Arc<dyn EventSink>,
}

impl RecoveryOrchestrator {
    pub fn new(
        registry: Arc<HealthCheckRegistry>,
        tracker: Arc<FailureTracker>,
        config: RecoveryConfig,
        probe_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            tracker,
            config,
            probe_timeout,
            stats: DashMap::new(),
            cooldowns: DashMap::new(),
            events,
        }
    }

    /// Try to resolve a failure. Returns `true` once the check verifies
    /// healthy, `false` after escalating.
    ///
    /// Fails with `NotFound` for an unregistered check and with
    /// `RecoveryInProgress` if another cycle is already running for the same
    /// failure.
    #[instrument(skip(self, failure), fields(check_id = %failure.id))]
    pub async fn attempt_recovery(&self, failure: &SystemFailure) -> HealthResult<bool> {
        let check = self.registry.get(&failure.id)?;

        let Some(_guard) = self.tracker.begin_recovery(&failure.id) else {
            return Err(HealthError::RecoveryInProgress(failure.id.clone()));
        };

        if !self.tracker.is_active(&failure.id) {
            debug!("Failure no longer active, nothing to recover");
            return Ok(true);
        }

        let candidates = self.rank(&check);
        let total = candidates.len();
        let mut executed = 0usize;

        for action in candidates {
            if !self.tracker.is_active(&failure.id) {
                info!("Failure resolved while recovery was running");
                return Ok(true);
            }

            if !self.claim_cooldown_slot(&check.component, action) {
                debug!(action_id = %action.id, "Action on cooldown, skipping");
                continue;
            }

            executed += 1;
            if self.run_candidate(&check, action).await {
                return Ok(true);
            }
        }

        let reason = if total == 0 {
            "no automated recovery actions registered".to_string()
        } else if executed == 0 {
            format!("all {} automated actions on cooldown", total)
        } else {
            format!(
                "{} of {} automated actions attempted without resolving the failure",
                executed, total
            )
        };
        self.escalate(failure, reason);

        Ok(false)
    }

    /// Execute one action and verify the check. Returns `true` if resolved.
    async fn run_candidate(&self, check: &HealthCheck, action: &RecoveryAction) -> bool {
        info!(action_id = %action.id, action = %action, "Executing recovery action");

        let (raw_result, message) = self.execute_action(action).await;
        let index = self.tracker.append_attempt(
            &check.id,
            RecoveryAttempt::new(action, raw_result, message.clone()),
        );

        if raw_result == AttemptResult::Failed {
            warn!(action_id = %action.id, %message, "Recovery action failed");
            self.finish_attempt(check, action, AttemptResult::Failed, message);
            return false;
        }

        tokio::time::sleep(self.config.grace_period).await;
        let verification = check.run(self.probe_timeout).await;

        match self.tracker.record_result(check, &verification) {
            RecordOutcome::Resolved(_) | RecordOutcome::Healthy => {
                info!(action_id = %action.id, "Recovery verified");
                self.finish_attempt(check, action, AttemptResult::Success, message);
                true
            }
            RecordOutcome::Detected(_) | RecordOutcome::Persisting(_) => {
                let message = format!(
                    "{}; check still unhealthy: {}",
                    message,
                    verification.error.as_deref().unwrap_or("no details reported")
                );
                if let Some(index) = index {
                    self.tracker
                        .update_attempt(&check.id, index, AttemptResult::Partial, message.clone());
                }
                info!(action_id = %action.id, "Recovery action did not resolve the failure");
                self.finish_attempt(check, action, AttemptResult::Partial, message);
                false
            }
        }
    }

    async fn execute_action(&self, action: &RecoveryAction) -> (AttemptResult, String) {
        match tokio::time::timeout(self.config.action_timeout, action.execute()).await {
            Ok(Ok(outcome)) if outcome.success => (AttemptResult::Success, outcome.message),
            Ok(Ok(outcome)) => (AttemptResult::Failed, outcome.message),
            Ok(Err(reason)) => {
                let err = HealthError::ActionExecution {
                    action_id: action.id.clone(),
                    reason,
                };
                (AttemptResult::Failed, err.to_string())
            }
            Err(_) => (
                AttemptResult::Failed,
                format!(
                    "timed out after {}ms",
                    self.config.action_timeout.as_millis()
                ),
            ),
        }
    }

    fn finish_attempt(
        &self,
        check: &HealthCheck,
        action: &RecoveryAction,
        result: AttemptResult,
        message: String,
    ) {
        self.stats.entry(action.id.clone()).or_insert_with(ActionStats::default).record(result);
        self.events.emit(ResilienceEvent::RecoveryAttempted {
            check_id: check.id.clone(),
            attempt: RecoveryAttempt::new(action, result, message),
        });
    }

    fn escalate(&self, failure: &SystemFailure, reason: String) {
        let failure = self
            .tracker
            .get(&failure.id)
            .unwrap_or_else(|| failure.clone());

        warn!(
            check_id = %failure.id,
            severity = %failure.severity,
            attempts = failure.recovery_attempts.len(),
            %reason,
            "Automated recovery exhausted, escalating"
        );
        self.events
            .emit(ResilienceEvent::RecoveryEscalated { failure, reason });
    }

    /// Automated actions, highest success rate first, then cheapest.
    fn rank<'a>(&self, check: &'a HealthCheck) -> Vec<&'a RecoveryAction> {
        let mut ranked: Vec<(f64, &RecoveryAction)> = check
            .automated_actions()
            .map(|action| (self.success_rate(&action.id), action))
            .collect();

        ranked.sort_by(|(rate_a, a), (rate_b, b)| {
            rate_b
                .total_cmp(rate_a)
                .then(a.estimated_downtime_secs.cmp(&b.estimated_downtime_secs))
        });

        ranked.into_iter().map(|(_, action)| action).collect()
    }

    fn conditions_for(&self, action: &RecoveryAction) -> RecoveryConditions {
        action.conditions.unwrap_or(RecoveryConditions {
            cooldown_window: self.config.default_cooldown_window,
            max_attempts_per_window: self.config.default_max_attempts_per_window,
        })
    }

    /// Record an attempt for `component` unless the action's window is full.
    fn claim_cooldown_slot(&self, component: &str, action: &RecoveryAction) -> bool {
        let conditions = self.conditions_for(action);
        let now = Instant::now();

        let mut log = self
            .cooldowns
            .entry((component.to_string(), action.id.clone()))
            .or_insert_with(|| CooldownLog {
                window: conditions.cooldown_window,
                attempts: VecDeque::new(),
            });
        log.window = conditions.cooldown_window;
        log.prune(now);

        if log.attempts.len() >= conditions.max_attempts_per_window as usize {
            return false;
        }
        log.attempts.push_back(now);
        true
    }

    /// Historical success rate, or the neutral prior without history.
    pub fn success_rate(&self, action_id: &ActionId) -> f64 {
        self.action_stats(action_id)
            .success_rate(self.config.neutral_success_prior)
    }

    pub fn action_stats(&self, action_id: &ActionId) -> ActionStats {
        self.stats.get(action_id).map(|s| *s).unwrap_or_default()
    }

    /// Statistics for every action attempted so far, ordered by id.
    pub fn all_action_stats(&self) -> Vec<(ActionId, ActionStats)> {
        let mut stats: Vec<_> = self
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Drop cooldown entries whose window has fully elapsed.
    pub fn prune_cooldowns(&self) -> usize {
        let now = Instant::now();
        let before = self.cooldowns.len();
        self.cooldowns.retain(|_, log| {
            log.prune(now);
            !log.attempts.is_empty()
        });
        before.saturating_sub(self.cooldowns.len())
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("config", &self.config)
            .field("tracked_actions", &self.stats.len())
            .field("cooldowns", &self.cooldowns.len())
            .finish_non_exhaustive()
    }
}
