//! Health probes.
//!
//! A probe is the no-argument function a health check runs to decide whether
//! its component is healthy. Probes never surface errors to the scheduler:
//! a probe that fails or hangs yields an unhealthy [`CheckResult`].

mod function;
mod store;

pub use function::{probe_fn, FnProbe};
pub use store::{Store, StorePingProbe};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_types::CheckId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HealthError;

/// Error text recorded when a probe exceeds its timeout.
pub const TIMEOUT_ERROR: &str = "timeout";

/// Result of a single probe execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the component is healthy.
    pub healthy: bool,

    /// Optional measurements reported by the probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HashMap<String, serde_json::Value>>,

    /// Reason the probe considers the component unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Latency of the probe in milliseconds.
    pub latency_ms: u64,

    /// Timestamp of the probe.
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    /// Create a healthy result.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            metrics: None,
            error: None,
            latency_ms: 0,
            checked_at: Utc::now(),
        }
    }

    /// Create an unhealthy result with a reason.
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            metrics: None,
            error: Some(error.into()),
            latency_ms: 0,
            checked_at: Utc::now(),
        }
    }

    /// Create the result recorded for a probe that timed out.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            latency_ms: timeout_ms,
            ..Self::unhealthy(TIMEOUT_ERROR)
        }
    }

    /// Attach a metric to the result.
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metrics
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn is_timeout(&self) -> bool {
        !self.healthy && self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}

/// Trait for health probes.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Execute the probe.
    ///
    /// `Err` means the probe itself could not run; it is recorded as an
    /// unhealthy result carrying the message.
    async fn check(&self) -> Result<CheckResult, String>;

    /// Get a description of what this probe measures.
    fn description(&self) -> &str {
        "health probe"
    }
}

/// Run a probe with a bounded timeout, folding every failure mode into a
/// [`CheckResult`].
pub async fn run_probe(check_id: &CheckId, probe: &dyn Probe, timeout: Duration) -> CheckResult {
    let start = Instant::now();
    let timeout_ms = timeout.as_millis() as u64;

    match tokio::time::timeout(timeout, probe.check()).await {
        Ok(Ok(result)) => {
            if result.latency_ms == 0 {
                result.with_latency(start.elapsed().as_millis() as u64)
            } else {
                result
            }
        }
        Ok(Err(reason)) => {
            let err = HealthError::ProbeFailed {
                check_id: check_id.clone(),
                reason: reason.clone(),
            };
            debug!(check_id = %check_id, error = %err, "Probe reported error");
            CheckResult::unhealthy(reason).with_latency(start.elapsed().as_millis() as u64)
        }
        Err(_) => {
            let err = HealthError::ProbeTimeout {
                check_id: check_id.clone(),
                timeout_ms,
            };
            warn!(check_id = %check_id, error = %err, "Probe timed out");
            CheckResult::timeout(timeout_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_probe_healthy() {
        let probe = probe_fn(|| async { Ok(CheckResult::healthy().with_metric("rows", 3)) });
        let result = run_probe(&CheckId::new("db"), probe.as_ref(), Duration::from_secs(1)).await;

        assert!(result.healthy);
        assert_eq!(
            result.metrics.unwrap().get("rows"),
            Some(&serde_json::Value::from(3))
        );
    }

    #[tokio::test]
    async fn test_run_probe_error_becomes_unhealthy() {
        let probe = probe_fn(|| async { Err("connection refused".to_string()) });
        let result = run_probe(&CheckId::new("db"), probe.as_ref(), Duration::from_secs(1)).await;

        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert!(!result.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probe_timeout() {
        let probe = probe_fn(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CheckResult::healthy())
        });
        let result = run_probe(&CheckId::new("slow"), probe.as_ref(), Duration::from_secs(5)).await;

        assert!(!result.healthy);
        assert!(result.is_timeout());
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert_eq!(result.latency_ms, 5000);
    }
}
