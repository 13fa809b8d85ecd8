//! Failure tracking.
//!
//! The tracker owns the set of currently failing checks. At most one active
//! [`SystemFailure`] exists per check; the scheduler and the recovery
//! orchestrator both write to it, one key at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hearth_types::{CheckId, CriticalityLevel};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::check::HealthCheck;
use crate::events::{EventSink, ResilienceEvent};
use crate::probes::CheckResult;
use crate::resilience::{AttemptResult, RecoveryAttempt};

/// A detected failure of one health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFailure {
    /// Id of the check that detected the failure.
    pub id: CheckId,
    pub component: String,

    /// Criticality of the originating check.
    pub severity: CriticalityLevel,

    pub description: String,
    pub detected_at: DateTime<Utc>,

    /// Append-only history of recovery attempts.
    pub recovery_attempts: Vec<RecoveryAttempt>,

    pub resolved_at: Option<DateTime<Utc>>,
}

impl SystemFailure {
    pub fn new(check: &HealthCheck, result: &CheckResult) -> Self {
        let reason = result.error.as_deref().unwrap_or("no details reported");
        Self {
            id: check.id.clone(),
            component: check.component.clone(),
            severity: check.criticality,
            description: format!("{} is unhealthy: {}", check.name, reason),
            detected_at: Utc::now(),
            recovery_attempts: Vec::new(),
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// What recording a check result did to the active set.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Healthy, and nothing was failing.
    Healthy,

    /// Unhealthy, and a new failure was opened.
    Detected(SystemFailure),

    /// Unhealthy, and a failure was already open.
    Persisting(SystemFailure),

    /// Healthy, and the open failure was resolved.
    Resolved(SystemFailure),
}

/// Tracker of active failures and their recovery history.
pub struct FailureTracker {
    active: DashMap<CheckId, SystemFailure>,

    /// Failures with a recovery cycle currently running.
    recovering: DashMap<CheckId, DateTime<Utc>>,

    /// Resolved failures, oldest first.
    resolved: Mutex<VecDeque<SystemFailure>>,

    events: Arc<dyn EventSink>,
}

impl FailureTracker {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            active: DashMap::new(),
            recovering: DashMap::new(),
            resolved: Mutex::new(VecDeque::new()),
            events,
        }
    }

    /// Fold one probe result into the active set.
    pub fn record_result(&self, check: &HealthCheck, result: &CheckResult) -> RecordOutcome {
        if result.healthy {
            return match self.resolve(&check.id) {
                Some(failure) => RecordOutcome::Resolved(failure),
                None => RecordOutcome::Healthy,
            };
        }

        let detected = match self.active.entry(check.id.clone()) {
            Entry::Occupied(existing) => {
                debug!(check_id = %check.id, "Failure already active");
                return RecordOutcome::Persisting(existing.get().clone());
            }
            Entry::Vacant(slot) => {
                let failure = SystemFailure::new(check, result);
                slot.insert(failure.clone());
                failure
            }
        };

        warn!(
            check_id = %check.id,
            component = %detected.component,
            severity = %detected.severity,
            description = %detected.description,
            "Failure detected"
        );
        self.events.emit(ResilienceEvent::FailureDetected {
            failure: detected.clone(),
        });

        RecordOutcome::Detected(detected)
    }

    /// Resolve the active failure for a check, if any.
    pub fn resolve(&self, check_id: &CheckId) -> Option<SystemFailure> {
        let (_, mut failure) = self.active.remove(check_id)?;
        failure.resolved_at = Some(Utc::now());

        info!(
            check_id = %check_id,
            attempts = failure.recovery_attempts.len(),
            "Failure resolved"
        );

        self.resolved.lock().push_back(failure.clone());
        self.events.emit(ResilienceEvent::FailureResolved {
            failure: failure.clone(),
        });

        Some(failure)
    }

    /// Append a recovery attempt to an active failure.
    ///
    /// Returns the attempt's index, or `None` if the failure is no longer
    /// active.
    pub fn append_attempt(&self, check_id: &CheckId, attempt: RecoveryAttempt) -> Option<usize> {
        let mut failure = self.active.get_mut(check_id)?;
        failure.recovery_attempts.push(attempt);
        Some(failure.recovery_attempts.len() - 1)
    }

    /// Overwrite the result of a recorded attempt.
    pub fn update_attempt(
        &self,
        check_id: &CheckId,
        index: usize,
        result: AttemptResult,
        message: impl Into<String>,
    ) -> bool {
        let Some(mut failure) = self.active.get_mut(check_id) else {
            return false;
        };
        match failure.recovery_attempts.get_mut(index) {
            Some(attempt) => {
                attempt.result = result;
                attempt.message = message.into();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, check_id: &CheckId) -> Option<SystemFailure> {
        self.active.get(check_id).map(|f| f.clone())
    }

    pub fn is_active(&self, check_id: &CheckId) -> bool {
        self.active.contains_key(check_id)
    }

    /// Current active failures, oldest first.
    pub fn list_active(&self) -> Vec<SystemFailure> {
        let mut failures: Vec<_> = self.active.iter().map(|f| f.value().clone()).collect();
        failures.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        failures
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Resolved failures still held in history, oldest first.
    pub fn list_resolved(&self) -> Vec<SystemFailure> {
        self.resolved.lock().iter().cloned().collect()
    }

    /// Claim the recovery slot for a failure.
    ///
    /// Returns `None` while another recovery cycle holds it. The slot is
    /// released when the guard drops.
    pub fn begin_recovery(&self, check_id: &CheckId) -> Option<RecoveryGuard<'_>> {
        match self.recovering.entry(check_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Some(RecoveryGuard {
                    tracker: self,
                    check_id: check_id.clone(),
                })
            }
        }
    }

    pub fn is_recovering(&self, check_id: &CheckId) -> bool {
        self.recovering.contains_key(check_id)
    }

    /// Drop the oldest resolved failures beyond `limit`. Returns how many
    /// were removed.
    pub fn trim_resolved(&self, limit: usize) -> usize {
        let mut resolved = self.resolved.lock();
        let excess = resolved.len().saturating_sub(limit);
        resolved.drain(..excess);
        excess
    }
}

/// Held while a recovery cycle runs for one failure.
pub struct RecoveryGuard<'a> {
    tracker: &'a FailureTracker,
    check_id: CheckId,
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.tracker.recovering.remove(&self.check_id);
    }
}
