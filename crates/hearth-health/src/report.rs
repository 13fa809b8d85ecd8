//! System health reports.
//!
//! A report re-runs every registered check at request time. For a cheap view
//! of what the scheduler last saw, read the failure tracker instead.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hearth_types::{CheckId, CriticalityLevel};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::failures::{FailureTracker, SystemFailure};
use crate::registry::HealthCheckRegistry;
use crate::resilience::{
    AttemptResult, CircuitBreakerBank, CircuitBreakerSnapshot, CircuitState, RecoveryOrchestrator,
};

/// Minimum attempts before an action's success rate is judged.
const MIN_ATTEMPTS_FOR_RATE: u64 = 3;

/// Success rate below which an action is flagged.
const POOR_SUCCESS_RATE: f64 = 0.5;

/// Overall system status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Healthy => write!(f, "healthy"),
            OverallStatus::Warning => write!(f, "warning"),
            OverallStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Fresh probe outcome for one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub check_id: CheckId,
    pub name: String,
    pub component: String,
    pub criticality: CriticalityLevel,
    pub healthy: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HashMap<String, serde_json::Value>>,

    pub latency_ms: u64,
    pub dependencies: Vec<CheckId>,
    pub checked_at: DateTime<Utc>,
}

/// Operator-facing suggestion derived from the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: CriticalityLevel,

    /// Check id or service id the recommendation is about.
    pub subject: String,

    pub message: String,
}

impl Recommendation {
    fn new(priority: CriticalityLevel, subject: impl fmt::Display, message: String) -> Self {
        Self {
            priority,
            subject: subject.to_string(),
            message,
        }
    }
}

/// Point-in-time view of the whole subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthReport {
    pub overall: OverallStatus,
    pub components: Vec<ComponentHealth>,
    pub active_failures: Vec<SystemFailure>,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,

    /// Highest priority first.
    pub recommendations: Vec<Recommendation>,

    pub generated_at: DateTime<Utc>,
}

impl SystemHealthReport {
    pub fn failing_components(&self) -> impl Iterator<Item = &ComponentHealth> {
        self.components.iter().filter(|c| !c.healthy)
    }
}

/// Builds [`SystemHealthReport`]s.
pub struct HealthReporter {
    registry: Arc<HealthCheckRegistry>,
    tracker: Arc<FailureTracker>,
    orchestrator: Arc<RecoveryOrchestrator>,
    bank: Arc<CircuitBreakerBank>,
    probe_timeout: Duration,
}

impl HealthReporter {
    pub fn new(
        registry: Arc<HealthCheckRegistry>,
        tracker: Arc<FailureTracker>,
        orchestrator: Arc<RecoveryOrchestrator>,
        bank: Arc<CircuitBreakerBank>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            orchestrator,
            bank,
            probe_timeout,
        }
    }

    /// Probe every check concurrently and assemble the report.
    #[instrument(skip(self))]
    pub async fn generate(&self) -> SystemHealthReport {
        let checks = self.registry.list();
        let timeout = self.probe_timeout;

        let components: Vec<ComponentHealth> = join_all(checks.iter().map(|check| async move {
            let result = check.run(timeout).await;
            ComponentHealth {
                check_id: check.id.clone(),
                name: check.name.clone(),
                component: check.component.clone(),
                criticality: check.criticality,
                healthy: result.healthy,
                error: result.error,
                metrics: result.metrics,
                latency_ms: result.latency_ms,
                dependencies: check.dependencies.iter().cloned().collect(),
                checked_at: result.checked_at,
            }
        }))
        .await;

        let overall = overall_status(&components);
        let active_failures = self.tracker.list_active();
        let circuit_breakers = self.bank.snapshots();
        let recommendations = self.recommendations(&components, &active_failures, &circuit_breakers);

        debug!(
            %overall,
            components = components.len(),
            active_failures = active_failures.len(),
            recommendations = recommendations.len(),
            "Health report generated"
        );

        SystemHealthReport {
            overall,
            components,
            active_failures,
            circuit_breakers,
            recommendations,
            generated_at: Utc::now(),
        }
    }

    fn recommendations(
        &self,
        components: &[ComponentHealth],
        active_failures: &[SystemFailure],
        breakers: &[CircuitBreakerSnapshot],
    ) -> Vec<Recommendation> {
        let mut out = Vec::new();

        let failing: BTreeSet<&CheckId> = components
            .iter()
            .filter(|c| !c.healthy)
            .map(|c| &c.check_id)
            .collect();

        for component in components.iter().filter(|c| !c.healthy) {
            if component.criticality.is_critical() {
                out.push(Recommendation::new(
                    CriticalityLevel::Critical,
                    &component.check_id,
                    format!(
                        "Critical component {} is failing ({}); investigate immediately",
                        component.name,
                        component.error.as_deref().unwrap_or("no details reported")
                    ),
                ));
            }

            let failing_deps: Vec<String> = component
                .dependencies
                .iter()
                .filter(|dep| failing.contains(dep))
                .map(|dep| dep.to_string())
                .collect();
            if !failing_deps.is_empty() {
                out.push(Recommendation::new(
                    component.criticality,
                    &component.check_id,
                    format!(
                        "{} depends on failing {}; resolve those first",
                        component.name,
                        failing_deps.join(", ")
                    ),
                ));
            }
        }

        for breaker in breakers {
            match breaker.state {
                CircuitState::Open => out.push(Recommendation::new(
                    CriticalityLevel::High,
                    &breaker.service_id,
                    format!(
                        "Circuit for {} is open; calls are failing fast until {}",
                        breaker.service_id,
                        breaker
                            .next_retry_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "the next trial".to_string())
                    ),
                )),
                CircuitState::HalfOpen => out.push(Recommendation::new(
                    CriticalityLevel::Low,
                    &breaker.service_id,
                    format!("Circuit for {} is testing recovery with trial calls", breaker.service_id),
                )),
                CircuitState::Closed => {}
            }
        }

        for failure in active_failures {
            let has_actions = self
                .registry
                .get(&failure.id)
                .map(|check| check.automated_actions().next().is_some())
                .unwrap_or(false);

            if !has_actions {
                out.push(Recommendation::new(
                    CriticalityLevel::Medium,
                    &failure.id,
                    format!(
                        "{} has no automated recovery actions; manual recovery required",
                        failure.component
                    ),
                ));
            } else if !failure.recovery_attempts.is_empty()
                && failure
                    .recovery_attempts
                    .iter()
                    .all(|a| a.result != AttemptResult::Success)
                && !self.tracker.is_recovering(&failure.id)
            {
                out.push(Recommendation::new(
                    failure.severity.max(CriticalityLevel::High),
                    &failure.id,
                    format!(
                        "Automated recovery has not resolved {} after {} attempts; manual intervention required",
                        failure.component,
                        failure.recovery_attempts.len()
                    ),
                ));
            }
        }

        for (action_id, stats) in self.orchestrator.all_action_stats() {
            let rate = stats.success_rate(self.orchestrator.config().neutral_success_prior);
            if stats.attempts >= MIN_ATTEMPTS_FOR_RATE && rate < POOR_SUCCESS_RATE {
                out.push(Recommendation::new(
                    CriticalityLevel::Low,
                    &action_id,
                    format!(
                        "Recovery action {} succeeds in only {:.0}% of {} attempts; review it",
                        action_id,
                        rate * 100.0,
                        stats.attempts
                    ),
                ));
            }
        }

        out.sort_by(|a, b| b.priority.cmp(&a.priority));
        out
    }
}

fn overall_status(components: &[ComponentHealth]) -> OverallStatus {
    let mut failing = components.iter().filter(|c| !c.healthy).peekable();
    if failing.peek().is_none() {
        return OverallStatus::Healthy;
    }
    if failing.any(|c| c.criticality.is_critical()) {
        OverallStatus::Critical
    } else {
        OverallStatus::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::HealthCheck;
    use crate::config::{CircuitBreakerConfig, RecoveryConfig};
    use crate::events::NoOpEventSink;
    use crate::probes::{probe_fn, CheckResult};
    use hearth_types::ServiceId;

    struct Fixture {
        registry: Arc<HealthCheckRegistry>,
        tracker: Arc<FailureTracker>,
        bank: Arc<CircuitBreakerBank>,
        reporter: HealthReporter,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(NoOpEventSink);
        let registry = Arc::new(HealthCheckRegistry::new());
        let tracker = Arc::new(FailureTracker::new(events.clone()));
        let bank = Arc::new(CircuitBreakerBank::new(CircuitBreakerConfig::default(), events.clone()));
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            registry.clone(),
            tracker.clone(),
            RecoveryConfig::default(),
            Duration::from_secs(5),
            events,
        ));
        let reporter = HealthReporter::new(
            registry.clone(),
            tracker.clone(),
            orchestrator,
            bank.clone(),
            Duration::from_secs(5),
        );
        Fixture {
            registry,
            tracker,
            bank,
            reporter,
        }
    }

    fn check(id: &str, criticality: CriticalityLevel, healthy: bool) -> HealthCheck {
        HealthCheck::new(
            id,
            id,
            id,
            probe_fn(move || async move {
                if healthy {
                    Ok(CheckResult::healthy().with_metric("connections", 4))
                } else {
                    Ok(CheckResult::unhealthy("unreachable"))
                }
            }),
        )
        .with_criticality(criticality)
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let f = fixture();
        f.registry.register(check("db", CriticalityLevel::Critical, true)).unwrap();
        f.registry.register(check("cache", CriticalityLevel::Low, true)).unwrap();

        let report = f.reporter.generate().await;
        assert_eq!(report.overall, OverallStatus::Healthy);
        assert_eq!(report.components.len(), 2);
        assert!(report.recommendations.is_empty());
        assert!(report.components[0].metrics.is_some());
    }

    #[tokio::test]
    async fn test_non_critical_failure_is_warning() {
        let f = fixture();
        f.registry.register(check("db", CriticalityLevel::Critical, true)).unwrap();
        f.registry.register(check("cache", CriticalityLevel::High, false)).unwrap();

        let report = f.reporter.generate().await;
        assert_eq!(report.overall, OverallStatus::Warning);
        assert_eq!(report.failing_components().count(), 1);
    }

    #[tokio::test]
    async fn test_critical_failure_is_critical() {
        let f = fixture();
        f.registry.register(check("cache", CriticalityLevel::Low, false)).unwrap();
        f.registry.register(check("db", CriticalityLevel::Critical, false)).unwrap();

        let report = f.reporter.generate().await;
        assert_eq!(report.overall, OverallStatus::Critical);
        assert_eq!(report.recommendations[0].priority, CriticalityLevel::Critical);
        assert_eq!(report.recommendations[0].subject, "check:db");
    }

    #[tokio::test]
    async fn test_report_does_not_touch_tracker() {
        let f = fixture();
        let failing = f
            .registry
            .register(check("db", CriticalityLevel::Medium, false))
            .unwrap();

        let report = f.reporter.generate().await;
        assert_eq!(report.overall, OverallStatus::Warning);
        assert!(report.active_failures.is_empty());
        assert_eq!(f.tracker.active_count(), 0);

        f.tracker.record_result(&failing, &CheckResult::unhealthy("down"));
        let report = f.reporter.generate().await;
        assert_eq!(report.active_failures.len(), 1);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.message.contains("no automated recovery actions")));
    }

    #[tokio::test]
    async fn test_failing_dependency_and_open_breaker_recommendations() {
        let f = fixture();
        f.registry.register(check("db", CriticalityLevel::High, false)).unwrap();
        f.registry
            .register(check("api", CriticalityLevel::Medium, false).depends_on("db"))
            .unwrap();

        let service = ServiceId::new("payments");
        f.bank.configure(service.clone(), None).unwrap();
        f.bank.force_state(&service, CircuitState::Open);

        let report = f.reporter.generate().await;
        assert_eq!(report.circuit_breakers.len(), 1);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.subject == "check:api" && r.message.contains("check:db")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.subject == "service:payments" && r.priority == CriticalityLevel::High));
    }
}
