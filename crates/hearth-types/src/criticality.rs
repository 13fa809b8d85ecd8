//! Criticality levels for health checks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How important a health check is to the overall system.
///
/// A failure inherits its severity from the criticality of the check that
/// detected it. Levels are ordered, `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CriticalityLevel {
    Low,
    #[default]
    Medium,
    High,
    /// A failing critical check drives the overall status to critical.
    Critical,
}

impl CriticalityLevel {
    pub fn is_critical(&self) -> bool {
        matches!(self, CriticalityLevel::Critical)
    }
}

impl fmt::Display for CriticalityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriticalityLevel::Low => write!(f, "low"),
            CriticalityLevel::Medium => write!(f, "medium"),
            CriticalityLevel::High => write!(f, "high"),
            CriticalityLevel::Critical => write!(f, "critical"),
        }
    }
}
