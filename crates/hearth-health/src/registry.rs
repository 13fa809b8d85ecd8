//! Health check registry.
//!
//! Checks are registered explicitly at start-up and live for the lifetime of
//! the process; there is no removal.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hearth_types::CheckId;
use parking_lot::RwLock;
use tracing::{info, instrument};

use crate::check::HealthCheck;
use crate::error::{HealthError, HealthResult};

/// Registry of health checks keyed by id.
#[derive(Default)]
pub struct HealthCheckRegistry {
    checks: DashMap<CheckId, Arc<HealthCheck>>,

    /// Registration order, used for deterministic iteration.
    order: RwLock<Vec<CheckId>>,
}

impl HealthCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check. Fails if the id is already taken.
    #[instrument(skip(self, check), fields(check_id = %check.id))]
    pub fn register(&self, check: HealthCheck) -> HealthResult<Arc<HealthCheck>> {
        match self.checks.entry(check.id.clone()) {
            Entry::Occupied(_) => Err(HealthError::DuplicateId(check.id)),
            Entry::Vacant(slot) => {
                info!(
                    component = %check.component,
                    criticality = %check.criticality,
                    actions = check.recovery_actions.len(),
                    "Registering health check"
                );
                let id = check.id.clone();
                let check = Arc::new(check);
                slot.insert(check.clone());
                self.order.write().push(id);
                Ok(check)
            }
        }
    }

    pub fn get(&self, check_id: &CheckId) -> HealthResult<Arc<HealthCheck>> {
        self.checks
            .get(check_id)
            .map(|c| c.clone())
            .ok_or_else(|| HealthError::NotFound(check_id.clone()))
    }

    pub fn contains(&self, check_id: &CheckId) -> bool {
        self.checks.contains_key(check_id)
    }

    /// All checks, in registration order.
    pub fn list(&self) -> Vec<Arc<HealthCheck>> {
        self.order
            .read()
            .iter()
            .filter_map(|id| self.checks.get(id).map(|c| c.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
