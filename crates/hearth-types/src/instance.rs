//! Service instance records used for load balancing.

use crate::InstanceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally observed health of a service instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceHealth {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl fmt::Display for InstanceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceHealth::Healthy => write!(f, "healthy"),
            InstanceHealth::Unhealthy => write!(f, "unhealthy"),
            InstanceHealth::Unknown => write!(f, "unknown"),
        }
    }
}

/// One endpoint of a load-balanced service.
///
/// Health and load are refreshed by whoever owns the pool; the selector only
/// reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: InstanceId,

    /// Address handed back to callers on selection.
    pub endpoint: String,

    #[serde(default)]
    pub health: InstanceHealth,

    /// Relative weight for weighted selection.
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Current number of in-flight requests or connections.
    #[serde(default)]
    pub current_load: u32,

    /// Optional continuous health score (0.0-1.0) for health-based selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,
}

fn default_weight() -> f64 {
    1.0
}

impl ServiceInstance {
    /// Create a new instance with unknown health and unit weight.
    pub fn new(id: impl Into<InstanceId>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            health: InstanceHealth::Unknown,
            weight: default_weight(),
            current_load: 0,
            health_score: None,
        }
    }

    pub fn with_health(mut self, health: InstanceHealth) -> Self {
        self.health = health;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_load(mut self, current_load: u32) -> Self {
        self.current_load = current_load;
        self
    }

    pub fn with_health_score(mut self, score: f64) -> Self {
        self.health_score = Some(score.clamp(0.0, 1.0));
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.health == InstanceHealth::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let instance = ServiceInstance::new("i-1", "http://10.0.0.1:8080");
        assert_eq!(instance.health, InstanceHealth::Unknown);
        assert_eq!(instance.weight, 1.0);
        assert!(!instance.is_healthy());

        let instance = instance.with_health(InstanceHealth::Healthy).with_health_score(1.7);
        assert!(instance.is_healthy());
        assert_eq!(instance.health_score, Some(1.0));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let instance: ServiceInstance =
            serde_json::from_str(r#"{"id":"i-2","endpoint":"10.0.0.2:80"}"#).unwrap();
        assert_eq!(instance.weight, 1.0);
        assert_eq!(instance.current_load, 0);
        assert_eq!(instance.health, InstanceHealth::Unknown);
    }
}
