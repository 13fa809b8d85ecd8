//! Probes backed by the application's data store.
//!
//! The store itself lives outside this crate; health checks only need to know
//! whether it answers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{CheckResult, Probe};

/// Opaque data store dependency queried by health checks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trip to the store.
    async fn ping(&self) -> Result<(), String>;

    /// Human-readable store name for logs.
    fn name(&self) -> &str {
        "store"
    }
}

/// Probe that pings a [`Store`].
pub struct StorePingProbe {
    store: Arc<dyn Store>,
}

impl StorePingProbe {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Probe for StorePingProbe {
    #[instrument(skip(self), fields(store = %self.store.name()))]
    async fn check(&self) -> Result<CheckResult, String> {
        let start = Instant::now();
        let outcome = self.store.ping().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        debug!(latency_ms, ok = outcome.is_ok(), "Store ping completed");

        Ok(match outcome {
            Ok(()) => CheckResult::healthy()
                .with_metric("latency_ms", latency_ms)
                .with_latency(latency_ms),
            Err(reason) => CheckResult::unhealthy(reason).with_latency(latency_ms),
        })
    }

    fn description(&self) -> &str {
        "pings the data store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ToggleStore {
        up: AtomicBool,
    }

    #[async_trait]
    impl Store for ToggleStore {
        async fn ping(&self) -> Result<(), String> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("store unreachable".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_store_ping_probe() {
        let store = Arc::new(ToggleStore {
            up: AtomicBool::new(true),
        });
        let probe = StorePingProbe::new(store.clone());

        let result = probe.check().await.unwrap();
        assert!(result.healthy);
        assert!(result.metrics.unwrap().contains_key("latency_ms"));

        store.up.store(false, Ordering::SeqCst);
        let result = probe.check().await.unwrap();
        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("store unreachable"));
    }
}
