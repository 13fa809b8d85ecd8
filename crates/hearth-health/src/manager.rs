//! The resilience manager.
//!
//! Owns every piece of shared state (registry, active failures, breakers,
//! pools) and hands out the operations the rest of the application calls.
//! There are no process-wide singletons; pass the manager around by `Arc`.

use std::future::Future;
use std::sync::Arc;

use hearth_types::{CheckId, ServiceId, ServiceInstance};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::balancer::{InstanceSelector, LoadBalancerConfig};
use crate::check::HealthCheck;
use crate::config::{CircuitBreakerConfig, ResilienceConfig};
use crate::error::{CircuitError, HealthResult};
use crate::events::EventSink;
use crate::failures::{FailureTracker, SystemFailure};
use crate::maintenance::MaintenanceTask;
use crate::registry::HealthCheckRegistry;
use crate::report::{HealthReporter, SystemHealthReport};
use crate::resilience::{CircuitBreakerBank, CircuitBreakerSnapshot, RecoveryOrchestrator};
use crate::scheduler::HealthCheckScheduler;
use crate::tasks::TaskSet;

/// Context object tying the resilience components together.
pub struct ResilienceManager {
    config: ResilienceConfig,
    registry: Arc<HealthCheckRegistry>,
    tracker: Arc<FailureTracker>,
    orchestrator: Arc<RecoveryOrchestrator>,
    bank: Arc<CircuitBreakerBank>,
    selector: Arc<InstanceSelector>,
    scheduler: Arc<HealthCheckScheduler>,
    reporter: HealthReporter,
    maintenance: Arc<MaintenanceTask>,
    tasks: Arc<TaskSet>,
    stop_tx: watch::Sender<bool>,

    /// Handles of the scheduler and maintenance loops once started.
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl ResilienceManager {
    /// Build a manager. Fails if the configuration is invalid.
    pub fn new(config: ResilienceConfig, events: Arc<dyn EventSink>) -> HealthResult<Self> {
        Self::with_selector(config, events, InstanceSelector::new())
    }

    /// Build a manager around a preconfigured selector (e.g. seeded).
    pub fn with_selector(
        config: ResilienceConfig,
        events: Arc<dyn EventSink>,
        selector: InstanceSelector,
    ) -> HealthResult<Self> {
        config.validate()?;

        let registry = Arc::new(HealthCheckRegistry::new());
        let tracker = Arc::new(FailureTracker::new(events.clone()));
        let bank = Arc::new(CircuitBreakerBank::new(
            config.circuit_breaker.clone(),
            events.clone(),
        ));
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            registry.clone(),
            tracker.clone(),
            config.recovery.clone(),
            config.scheduler.probe_timeout,
            events.clone(),
        ));
        let tasks = Arc::new(TaskSet::new());
        let scheduler = Arc::new(HealthCheckScheduler::new(
            registry.clone(),
            tracker.clone(),
            orchestrator.clone(),
            config.scheduler.clone(),
            tasks.clone(),
            events,
        ));
        let reporter = HealthReporter::new(
            registry.clone(),
            tracker.clone(),
            orchestrator.clone(),
            bank.clone(),
            config.scheduler.probe_timeout,
        );
        let maintenance = Arc::new(MaintenanceTask::new(
            tracker.clone(),
            orchestrator.clone(),
            config.maintenance.clone(),
        ));
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            registry,
            tracker,
            orchestrator,
            bank,
            selector: Arc::new(selector),
            scheduler,
            reporter,
            maintenance,
            tasks,
            stop_tx,
            loops: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    // Health checks

    pub fn register_health_check(&self, check: HealthCheck) -> HealthResult<Arc<HealthCheck>> {
        self.registry.register(check)
    }

    /// Run one scheduling cycle now, outside the ticker.
    pub fn run_checks_now(&self) -> usize {
        self.scheduler.run_cycle()
    }

    pub fn pause_check(&self, check_id: &CheckId) -> bool {
        self.scheduler.pause(check_id)
    }

    pub fn resume_check(&self, check_id: &CheckId) -> bool {
        self.scheduler.resume(check_id)
    }

    // Failures and recovery

    pub fn list_active_failures(&self) -> Vec<SystemFailure> {
        self.tracker.list_active()
    }

    pub fn list_resolved_failures(&self) -> Vec<SystemFailure> {
        self.tracker.list_resolved()
    }

    /// Run a recovery cycle for a check's active failure on the caller's
    /// task. Returns `true` if nothing is failing any more.
    pub async fn attempt_recovery(&self, check_id: &CheckId) -> HealthResult<bool> {
        let check = self.registry.get(check_id)?;
        match self.tracker.get(&check.id) {
            Some(failure) => self.orchestrator.attempt_recovery(&failure).await,
            None => Ok(true),
        }
    }

    // Circuit breakers

    pub fn configure_circuit_breaker(
        &self,
        service_id: impl Into<ServiceId>,
        config: Option<CircuitBreakerConfig>,
    ) -> HealthResult<()> {
        self.bank.configure(service_id.into(), config)
    }

    /// Run `operation` behind the service's circuit breaker.
    pub async fn execute_with_circuit_breaker<T, E, F, Fut>(
        &self,
        service_id: &ServiceId,
        operation: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.bank.execute(service_id, operation).await
    }

    /// Run `operation` behind the service's circuit breaker, answering from
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
        self.bank
            .execute_with_fallback(service_id, operation, fallback)
            .await
    }

    pub fn circuit_breakers(&self) -> Vec<CircuitBreakerSnapshot> {
        self.bank.snapshots()
    }

    // Load balancing

    pub fn configure_pool(&self, config: LoadBalancerConfig) -> HealthResult<()> {
        self.selector.configure(config)
    }

    pub fn update_instance(
        &self,
        service_id: &ServiceId,
        instance: ServiceInstance,
    ) -> HealthResult<bool> {
        self.selector.update_instance(service_id, instance)
    }

    /// Endpoint of a healthy instance, or `NotAvailable`.
    pub fn select_instance(&self, service_id: &ServiceId) -> HealthResult<String> {
        self.selector.select(service_id).map(|instance| instance.endpoint)
    }

    // Reporting

    pub async fn system_health_report(&self) -> SystemHealthReport {
        self.reporter.generate().await
    }

    // Component access

    pub fn registry(&self) -> &Arc<HealthCheckRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<FailureTracker> {
        &self.tracker
    }

    pub fn orchestrator(&self) -> &Arc<RecoveryOrchestrator> {
        &self.orchestrator
    }

    pub fn circuit_breaker_bank(&self) -> &Arc<CircuitBreakerBank> {
        &self.bank
    }

    pub fn selector(&self) -> &Arc<InstanceSelector> {
        &self.selector
    }

    // Lifecycle

    /// Start the scheduler and maintenance loops. Calling it again while
    /// they run does nothing.
    pub fn start(&self) {
        let mut loops = self.loops.lock();
        if !loops.is_empty() {
            return;
        }

        self.stop_tx.send_replace(false);
        info!(
            checks = self.registry.len(),
            check_interval_ms = self.config.scheduler.check_interval.as_millis() as u64,
            "Starting resilience manager"
        );

        loops.push(tokio::spawn(
            self.scheduler.clone().run(self.stop_tx.subscribe()),
        ));
        loops.push(tokio::spawn(
            self.maintenance.clone().run(self.stop_tx.subscribe()),
        ));
    }

    /// Wait until every spawned check run and recovery cycle has finished.
    pub async fn wait_idle(&self) {
        self.tasks.drain().await;
    }

    /// Stop scheduling and wait for in-flight check runs and recovery
    /// cycles to finish.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.stop_tx.send_replace(true);

        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "Background loop ended abnormally");
            }
        }

        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight checks and recoveries");
        }
        self.tasks.drain().await;

        info!("Resilience manager stopped");
    }
}
