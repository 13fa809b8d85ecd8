//! Health check definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hearth_types::{CheckId, CriticalityLevel};

use crate::probes::{run_probe, CheckResult, Probe};
use crate::resilience::RecoveryAction;

/// A named probe plus the metadata and recovery actions attached to it.
///
/// Checks are built once at start-up and never change after registration.
#[derive(Clone)]
pub struct HealthCheck {
    pub id: CheckId,
    pub name: String,

    /// Category tag, e.g. "database" or "cache".
    pub component: String,

    pub criticality: CriticalityLevel,

    /// Checks this one depends on. Informational only.
    pub dependencies: BTreeSet<CheckId>,

    /// Recovery actions in registration order.
    pub recovery_actions: Vec<RecoveryAction>,

    probe: Arc<dyn Probe>,
}

impl HealthCheck {
    /// Create a medium-criticality check with no dependencies or actions.
    pub fn new(
        id: impl Into<CheckId>,
        name: impl Into<String>,
        component: impl Into<String>,
        probe: Arc<dyn Probe>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            component: component.into(),
            criticality: CriticalityLevel::default(),
            dependencies: BTreeSet::new(),
            recovery_actions: Vec::new(),
            probe,
        }
    }

    pub fn with_criticality(mut self, criticality: CriticalityLevel) -> Self {
        self.criticality = criticality;
        self
    }

    pub fn depends_on(mut self, check_id: impl Into<CheckId>) -> Self {
        self.dependencies.insert(check_id.into());
        self
    }

    pub fn with_recovery_action(mut self, action: RecoveryAction) -> Self {
        self.recovery_actions.push(action);
        self
    }

    /// Automated actions, in registration order.
    pub fn automated_actions(&self) -> impl Iterator<Item = &RecoveryAction> {
        self.recovery_actions.iter().filter(|a| a.automated)
    }

    /// Run the probe with a bounded timeout.
    pub async fn run(&self, timeout: Duration) -> CheckResult {
        run_probe(&self.id, self.probe.as_ref(), timeout).await
    }
}

impl fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheck")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("component", &self.component)
            .field("criticality", &self.criticality)
            .field("dependencies", &self.dependencies)
            .field("recovery_actions", &self.recovery_actions)
            .finish_non_exhaustive()
    }
}
