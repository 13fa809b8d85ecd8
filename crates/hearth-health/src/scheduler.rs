//! Periodic health check scheduling.
//!
//! Every tick runs each registered check on its own task. A check whose
//! previous run has not finished is skipped for that tick, never overlapped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use hearth_types::CheckId;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::check::HealthCheck;
use crate::config::SchedulerConfig;
use crate::error::HealthError;
use crate::events::{EventSink, ResilienceEvent};
use crate::failures::{FailureTracker, RecordOutcome, SystemFailure};
use crate::registry::HealthCheckRegistry;
use crate::resilience::RecoveryOrchestrator;
use crate::tasks::TaskSet;

/// Clears a check's running flag when its run ends.
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs registered checks on a fixed interval and feeds the results to the
/// failure tracker.
pub struct HealthCheckScheduler {
    registry: Arc<HealthCheckRegistry>,
    tracker: Arc<FailureTracker>,
    orchestrator: Arc<RecoveryOrchestrator>,
    config: SchedulerConfig,

    /// Per-check "run in progress" flags.
    running: DashMap<CheckId, Arc<AtomicBool>>,

    paused: DashSet<CheckId>,

    tasks: Arc<TaskSet>,
    events: Arc<dyn EventSink>,
}

impl HealthCheckScheduler {
    pub fn new(
        registry: Arc<HealthCheckRegistry>,
        tracker: Arc<FailureTracker>,
        orchestrator: Arc<RecoveryOrchestrator>,
        config: SchedulerConfig,
        tasks: Arc<TaskSet>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            tracker,
            orchestrator,
            config,
            running: DashMap::new(),
            paused: DashSet::new(),
            tasks,
            events,
        }
    }

    /// Tick until `stop` flips to true. Runs already started are left to
    /// finish on their own.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            checks = self.registry.len(),
            "Health check scheduler started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle();
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Health check scheduler stopped");
    }

    /// Start a run for every registered, unpaused, idle check. Returns the
    /// number of runs started.
    pub fn run_cycle(self: &Arc<Self>) -> usize {
        let mut started = 0;

        for check in self.registry.list() {
            if self.paused.contains(&check.id) {
                debug!(check_id = %check.id, "Check paused, skipping");
                continue;
            }

            let Some(flag) = self.claim(&check.id) else {
                debug!(check_id = %check.id, "Previous run still in progress, skipping");
                self.events.emit(ResilienceEvent::CheckSkipped {
                    check_id: check.id.clone(),
                    reason: "previous run still in progress".to_string(),
                });
                continue;
            };

            let scheduler = Arc::clone(self);
            self.tasks.spawn(async move {
                let _flag = flag;
                scheduler.run_check(&check).await;
            });
            started += 1;
        }

        started
    }

    fn claim(&self, check_id: &CheckId) -> Option<RunningFlag> {
        let flag = self
            .running
            .entry(check_id.clone())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone();

        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningFlag(flag))
    }

    async fn run_check(self: &Arc<Self>, check: &HealthCheck) {
        let result = check.run(self.config.probe_timeout).await;

        match self.tracker.record_result(check, &result) {
            RecordOutcome::Detected(failure) => self.spawn_recovery(failure),
            RecordOutcome::Persisting(failure) => {
                let retry = self.orchestrator.config().retry_on_persisting;
                if retry && !self.tracker.is_recovering(&failure.id) {
                    self.spawn_recovery(failure);
                }
            }
            RecordOutcome::Resolved(_) | RecordOutcome::Healthy => {}
        }
    }

    fn spawn_recovery(&self, failure: SystemFailure) {
        if !self.orchestrator.config().enabled {
            return;
        }

        let orchestrator = self.orchestrator.clone();
        self.tasks.spawn(async move {
            match orchestrator.attempt_recovery(&failure).await {
                Ok(_) => {}
                Err(HealthError::RecoveryInProgress(check_id)) => {
                    debug!(check_id = %check_id, "Recovery already running");
                }
                Err(e) => {
                    error!(check_id = %failure.id, error = %e, "Recovery could not start");
                }
            }
        });
    }

    /// Exclude a check from scheduled runs. Reports still probe it.
    pub fn pause(&self, check_id: &CheckId) -> bool {
        if !self.registry.contains(check_id) {
            return false;
        }
        info!(check_id = %check_id, "Pausing scheduled checks");
        self.paused.insert(check_id.clone());
        true
    }

    pub fn resume(&self, check_id: &CheckId) -> bool {
        let resumed = self.paused.remove(check_id).is_some();
        if resumed {
            info!(check_id = %check_id, "Resuming scheduled checks");
        }
        resumed
    }

    pub fn is_paused(&self, check_id: &CheckId) -> bool {
        self.paused.contains(check_id)
    }

    /// Whether a scheduled run of the check is in progress.
    pub fn is_running(&self, check_id: &CheckId) -> bool {
        self.running
            .get(check_id)
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryConfig;
    use crate::events::MemoryEventSink;
    use crate::probes::{probe_fn, CheckResult};
    use crate::resilience::{ActionOutcome, RecoveryAction, RecoveryActionKind};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Fixture {
        registry: Arc<HealthCheckRegistry>,
        tracker: Arc<FailureTracker>,
        scheduler: Arc<HealthCheckScheduler>,
        tasks: Arc<TaskSet>,
        sink: Arc<MemoryEventSink>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(MemoryEventSink::new());
        let registry = Arc::new(HealthCheckRegistry::new());
        let tracker = Arc::new(FailureTracker::new(sink.clone()));
        let tasks = Arc::new(TaskSet::new());
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            registry.clone(),
            tracker.clone(),
            RecoveryConfig::default(),
            Duration::from_secs(5),
            sink.clone(),
        ));
        let scheduler = Arc::new(HealthCheckScheduler::new(
            registry.clone(),
            tracker.clone(),
            orchestrator,
            SchedulerConfig::default(),
            tasks.clone(),
            sink.clone(),
        ));
        Fixture {
            registry,
            tracker,
            scheduler,
            tasks,
            sink,
        }
    }

    fn counting_check(id: &str, calls: Arc<AtomicU32>, delay: Duration) -> HealthCheck {
        HealthCheck::new(
            id,
            id,
            "test",
            probe_fn(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(delay).await;
                    Ok(CheckResult::healthy())
                }
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_run_is_skipped() {
        let f = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        f.registry
            .register(counting_check("slow", calls.clone(), Duration::from_secs(4)))
            .unwrap();

        assert_eq!(f.scheduler.run_cycle(), 1);
        tokio::task::yield_now().await;
        assert!(f.scheduler.is_running(&CheckId::new("slow")));

        assert_eq!(f.scheduler.run_cycle(), 0);
        assert_eq!(f.sink.count("check_skipped"), 1);

        f.tasks.drain().await;
        assert!(!f.scheduler.is_running(&CheckId::new("slow")));
        assert_eq!(f.scheduler.run_cycle(), 1);
        f.tasks.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_check_does_not_block_others() {
        let f = fixture();
        let slow_calls = Arc::new(AtomicU32::new(0));
        let fast_calls = Arc::new(AtomicU32::new(0));
        f.registry
            .register(counting_check("slow", slow_calls.clone(), Duration::from_secs(60)))
            .unwrap();
        f.registry
            .register(counting_check("fast", fast_calls.clone(), Duration::ZERO))
            .unwrap();

        assert_eq!(f.scheduler.run_cycle(), 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.scheduler.run_cycle(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(fast_calls.load(Ordering::SeqCst), 2);
        assert_eq!(slow_calls.load(Ordering::SeqCst), 1);
        f.tasks.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_check_is_skipped() {
        let f = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        f.registry
            .register(counting_check("db", calls.clone(), Duration::ZERO))
            .unwrap();
        let id = CheckId::new("db");

        assert!(f.scheduler.pause(&id));
        assert_eq!(f.scheduler.run_cycle(), 0);
        assert!(f.scheduler.resume(&id));
        assert!(!f.scheduler.resume(&id));
        assert_eq!(f.scheduler.run_cycle(), 1);
        f.tasks.drain().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!f.scheduler.pause(&CheckId::new("missing")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detected_failure_triggers_recovery() {
        let f = fixture();
        let healthy = Arc::new(AtomicBool::new(false));

        let probe_state = healthy.clone();
        let action_state = healthy.clone();
        f.registry
            .register(
                HealthCheck::new(
                    "cache",
                    "Cache",
                    "cache",
                    probe_fn(move || {
                        let healthy = probe_state.load(Ordering::SeqCst);
                        async move {
                            if healthy {
                                Ok(CheckResult::healthy())
                            } else {
                                Ok(CheckResult::unhealthy("evictions spiking"))
                            }
                        }
                    }),
                )
                .with_recovery_action(RecoveryAction::from_fn(
                    "flush",
                    "Flush cache",
                    RecoveryActionKind::CacheClear,
                    move || {
                        action_state.store(true, Ordering::SeqCst);
                        async { Ok(ActionOutcome::success("flushed")) }
                    },
                )),
            )
            .unwrap();

        f.scheduler.run_cycle();
        f.tasks.drain().await;

        assert!(f.tracker.list_active().is_empty());
        let resolved = f.tracker.list_resolved();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].recovery_attempts.len(), 1);
        assert_eq!(f.sink.count("failure_detected"), 1);
        assert_eq!(f.sink.count("failure_resolved"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_ticks_until_stopped() {
        let f = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        f.registry
            .register(counting_check("db", calls.clone(), Duration::ZERO))
            .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(f.scheduler.clone().run(stop_rx));

        // Ticks at 0s, 30s and 60s
        tokio::time::sleep(Duration::from_secs(65)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();
        f.tasks.drain().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
