//! Circuit breaker bank.
//!
//! Holds one breaker per configured service. Breakers are created lazily on
//! first use and never share a lock with each other.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hearth_types::ServiceId;
use tracing::{debug, info};

use super::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
use crate::config::CircuitBreakerConfig;
use crate::error::{CircuitError, HealthResult};
use crate::events::EventSink;

/// Per-service circuit breakers guarding outbound calls.
pub struct CircuitBreakerBank {
    /// Configuration per guarded service.
    configs: DashMap<ServiceId, CircuitBreakerConfig>,

    /// Breakers created so far.
    breakers: DashMap<ServiceId, Arc<CircuitBreaker>>,

    /// Used for services configured without explicit values.
    default_config: CircuitBreakerConfig,

    events: Arc<dyn EventSink>,
}

impl CircuitBreakerBank {
    pub fn new(default_config: CircuitBreakerConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            configs: DashMap::new(),
            breakers: DashMap::new(),
            default_config,
            events,
        }
    }

    /// Guard a service. `None` applies the bank's default configuration.
    ///
    /// Reconfiguring a service discards its current breaker state.
    pub fn configure(
        &self,
        service_id: ServiceId,
        config: Option<CircuitBreakerConfig>,
    ) -> HealthResult<()> {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        config.validate()?;

        info!(
            service_id = %service_id,
            failure_threshold = config.failure_threshold,
            open_duration_ms = config.open_duration.as_millis() as u64,
            "Configuring circuit breaker"
        );

        // Hold the breaker slot so a concurrent `breaker()` cannot rebuild
        // from the old configuration.
        let slot = self.breakers.entry(service_id.clone());
        self.configs.insert(service_id, config);
        if let Entry::Occupied(existing) = slot {
            existing.remove();
        }
        Ok(())
    }

    pub fn is_configured(&self, service_id: &ServiceId) -> bool {
        self.configs.contains_key(service_id)
    }

    /// Get or create the breaker for a configured service.
    pub fn breaker(&self, service_id: &ServiceId) -> Option<Arc<CircuitBreaker>> {
        if let Some(breaker) = self.breakers.get(service_id) {
            return Some(breaker.clone());
        }

        match self.breakers.entry(service_id.clone()) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(slot) => {
                let config = self.configs.get(service_id)?.clone();
                debug!(service_id = %service_id, "Creating circuit breaker");
                let breaker = Arc::new(CircuitBreaker::new(
                    service_id.clone(),
                    config,
                    self.events.clone(),
                ));
                Some(slot.insert(breaker).clone())
            }
        }
    }

    /// Run an operation through the service's breaker.
    ///
    /// Services without a configured breaker run unguarded.
    pub async fn execute<T, E, F, Fut>(
        &self,
        service_id: &ServiceId,
        operation: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call(
            service_id,
            operation,
            None::<fn() -> std::future::Ready<Result<T, E>>>,
        )
        .await
    }

    /// Run an operation through the service's breaker, answering from
    /// `fallback` when the circuit is open or the operation fails.
    pub async fn execute_with_fallback<T, E, F, Fut, Fb, FbFut>(
        &self,
        service_id: &ServiceId,
        operation: F,
        fallback: Fb,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        self.call(service_id, operation, Some(fallback)).await
    }

    async fn call<T, E, F, Fut, Fb, FbFut>(
        &self,
        service_id: &ServiceId,
        operation: F,
        fallback: Option<Fb>,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        let Some(breaker) = self.breaker(service_id) else {
            return operation().await.map_err(CircuitError::Operation);
        };

        if let Admission::Rejected { retry_at } = breaker.try_acquire() {
            debug!(service_id = %service_id, "Circuit open, short-circuiting call");
            return match fallback {
                Some(fallback) => fallback().await.map_err(CircuitError::Operation),
                None => Err(CircuitError::ServiceUnavailable {
                    service_id: service_id.clone(),
                    retry_at,
                }),
            };
        }

        match operation().await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                breaker.record_failure();
                match fallback {
                    Some(fallback) => {
                        debug!(service_id = %service_id, "Operation failed, using fallback");
                        fallback().await.map_err(CircuitError::Operation)
                    }
                    None => Err(CircuitError::Operation(e)),
                }
            }
        }
    }

    /// Reset a breaker to closed. Returns false if the service is not guarded.
    pub fn reset(&self, service_id: &ServiceId) -> bool {
        match self.breaker(service_id) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Force a breaker into a state. Returns false if the service is not guarded.
    pub fn force_state(&self, service_id: &ServiceId, state: CircuitState) -> bool {
        match self.breaker(service_id) {
            Some(breaker) => {
                breaker.force_state(state);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, service_id: &ServiceId) -> Option<CircuitBreakerSnapshot> {
        self.breakers.get(service_id).map(|b| b.snapshot())
    }

    /// Snapshots of every breaker created so far, ordered by service id.
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn bank() -> (CircuitBreakerBank, Arc<MemoryEventSink>) {
        let sink = Arc::new(MemoryEventSink::new());
        let bank = CircuitBreakerBank::new(
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_duration: Duration::from_secs(30),
                half_open_success_threshold: 1,
            },
            sink.clone(),
        );
        (bank, sink)
    }

    async fn fail(calls: &AtomicU32) -> Result<u32, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err("boom".to_string())
    }

    #[tokio::test]
    async fn test_unconfigured_service_passes_through() {
        let (bank, _) = bank();
        let service = ServiceId::new("unguarded");

        let result: Result<u32, CircuitError<String>> =
            bank.execute(&service, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);

        let result: Result<u32, CircuitError<String>> = bank
            .execute(&service, || async { Err("boom".to_string()) })
            .await;
        assert_eq!(result.unwrap_err().into_operation().as_deref(), Some("boom"));
        assert!(bank.snapshots().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast_without_invoking_operation() {
        let (bank, sink) = bank();
        let service = ServiceId::new("payments");
        bank.configure(service.clone(), None).unwrap();

        let calls = AtomicU32::new(0);
        for _ in 0..2 {
            let err = bank.execute(&service, || fail(&calls)).await.unwrap_err();
            assert!(!err.is_unavailable());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let err = bank.execute(&service, || fail(&calls)).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.count("circuit_opened"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_uses_fallback() {
        let (bank, _) = bank();
        let service = ServiceId::new("payments");
        bank.configure(service.clone(), None).unwrap();
        bank.force_state(&service, CircuitState::Open);

        let result: Result<&str, CircuitError<String>> = bank
            .execute_with_fallback(&service, || async { Ok("live") }, || async { Ok("cached") })
            .await;
        assert_eq!(result.unwrap(), "cached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_uses_fallback_and_counts_failure() {
        let (bank, _) = bank();
        let service = ServiceId::new("payments");
        bank.configure(service.clone(), None).unwrap();

        let result: Result<&str, CircuitError<String>> = bank
            .execute_with_fallback(
                &service,
                || async { Err("boom".to_string()) },
                || async { Ok("cached") },
            )
            .await;
        assert_eq!(result.unwrap(), "cached");
        assert_eq!(bank.snapshot(&service).unwrap().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_call_after_open_duration() {
        let (bank, _) = bank();
        let service = ServiceId::new("payments");
        bank.configure(service.clone(), None).unwrap();
        bank.force_state(&service, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;

        let result: Result<u32, CircuitError<String>> =
            bank.execute(&service, || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(bank.snapshot(&service).unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_and_reconfigure() {
        let (bank, _) = bank();
        let service = ServiceId::new("payments");
        assert!(!bank.reset(&service));

        bank.configure(service.clone(), None).unwrap();
        assert!(bank.force_state(&service, CircuitState::Open));
        assert!(bank.reset(&service));
        assert_eq!(bank.snapshot(&service).unwrap().state, CircuitState::Closed);

        let invalid = CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(bank.configure(service, Some(invalid)).is_err());
    }

    #[test]
    fn test_reconfigure_while_breaker_is_looked_up() {
        let (bank, _) = bank();
        let service = ServiceId::new("payments");
        let threshold = |n: u32| CircuitBreakerConfig {
            failure_threshold: n,
            ..CircuitBreakerConfig::default()
        };
        bank.configure(service.clone(), Some(threshold(1))).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        bank.breaker(&service);
                    }
                });
            }
            for n in 1..=200 {
                bank.configure(service.clone(), Some(threshold(n))).unwrap();
            }
        });

        let breaker = bank.breaker(&service).unwrap();
        assert_eq!(breaker.config().failure_threshold, 200);
    }
}
