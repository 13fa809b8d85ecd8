//! Daemon lifecycle: build the manager, run until signalled, shut down.

use std::sync::Arc;
use std::time::Duration;

use hearth_health::{
    probe_fn, ActionOutcome, BroadcastEventSink, CheckResult, CircuitState, EventSink,
    FanoutEventSink, HealthCheck, RecoveryAction, RecoveryActionKind, ResilienceManager, Store,
    StorePingProbe, TracingEventSink,
};
use hearth_types::{CriticalityLevel, ServiceId};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{DaemonConfig, DemoConfig};
use crate::error::DaemonResult;
use crate::storage::SimulatedStore;

/// Service guarded by the demo payment check.
const PAYMENT_GATEWAY: &str = "payment-gateway";

/// The running daemon.
pub struct Daemon {
    config: DaemonConfig,
    manager: Arc<ResilienceManager>,
    events: Arc<BroadcastEventSink>,
    stores: Vec<Arc<SimulatedStore>>,
}

impl Daemon {
    /// Build the manager and install configured breakers, pools and demo
    /// checks.
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let resilience = config.to_resilience_config();

        let events = Arc::new(BroadcastEventSink::default());
        let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingEventSink), events.clone()];
        let manager = Arc::new(ResilienceManager::new(
            resilience.clone(),
            Arc::new(FanoutEventSink::new(sinks)),
        )?);

        for guarded in &config.circuit_breakers {
            manager.configure_circuit_breaker(
                guarded.service_id.clone(),
                guarded.breaker_config(&resilience.circuit_breaker),
            )?;
        }

        for pool in &config.pools {
            manager.configure_pool(pool.clone())?;
        }

        let stores = if config.demo.enabled {
            register_demo_checks(&manager, &config.demo)?
        } else {
            Vec::new()
        };

        info!(
            checks = manager.registry().len(),
            circuit_breakers = config.circuit_breakers.len(),
            pools = config.pools.len(),
            "Daemon initialized"
        );

        Ok(Self {
            config,
            manager,
            events,
            stores,
        })
    }

    pub fn manager(&self) -> &Arc<ResilienceManager> {
        &self.manager
    }

    pub fn events(&self) -> &Arc<BroadcastEventSink> {
        &self.events
    }

    pub fn stores(&self) -> &[Arc<SimulatedStore>] {
        &self.stores
    }

    /// Run until Ctrl+C or SIGTERM, then shut down gracefully.
    pub async fn run(self) -> DaemonResult<()> {
        self.manager.start();
        let reporter = self.spawn_reporter();

        shutdown_signal().await?;

        if let Some(reporter) = reporter {
            reporter.abort();
        }
        self.manager.shutdown().await;

        info!("Daemon stopped");
        Ok(())
    }

    fn spawn_reporter(&self) -> Option<JoinHandle<()>> {
        let secs = self.config.resilience.report_interval_secs;
        if secs == 0 {
            return None;
        }

        let manager = self.manager.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.tick().await;

            loop {
                ticker.tick().await;
                log_report(&manager).await;
            }
        }))
    }
}

async fn log_report(manager: &ResilienceManager) {
    let report = manager.system_health_report().await;
    let open_circuits = report
        .circuit_breakers
        .iter()
        .filter(|b| b.state == CircuitState::Open)
        .count();

    info!(
        overall = %report.overall,
        components = report.components.len(),
        failing = report.failing_components().count(),
        active_failures = report.active_failures.len(),
        open_circuits,
        "Health report"
    );

    for recommendation in &report.recommendations {
        warn!(
            priority = %recommendation.priority,
            subject = %recommendation.subject,
            "{}",
            recommendation.message
        );
    }
}

/// Register the hotel platform's demo checks against simulated stores.
fn register_demo_checks(
    manager: &Arc<ResilienceManager>,
    demo: &DemoConfig,
) -> DaemonResult<Vec<Arc<SimulatedStore>>> {
    let reservations = Arc::new(SimulatedStore::new("reservations-db", demo.outage_rate));
    let sessions = Arc::new(SimulatedStore::new("session-cache", demo.outage_rate));

    manager.register_health_check(
        HealthCheck::new(
            "reservations-db",
            "Reservations database",
            "database",
            Arc::new(StorePingProbe::new(reservations.clone())),
        )
        .with_criticality(CriticalityLevel::Critical)
        .with_recovery_action(reconnect_action(
            "reconnect-reservations-db",
            "Reconnect reservations pool",
            RecoveryActionKind::Restart,
            reservations.clone(),
        )
        .with_estimated_downtime(2))
        .with_recovery_action(
            RecoveryAction::from_fn(
                "page-dba",
                "Page the on-call DBA",
                RecoveryActionKind::Alert,
                || async { Ok(ActionOutcome::success("on-call paged")) },
            )
            .manual(),
        ),
    )?;

    manager.register_health_check(
        HealthCheck::new(
            "session-cache",
            "Guest session cache",
            "cache",
            Arc::new(StorePingProbe::new(sessions.clone())),
        )
        .with_criticality(CriticalityLevel::Medium)
        .with_recovery_action(reconnect_action(
            "flush-session-cache",
            "Flush and reconnect session cache",
            RecoveryActionKind::CacheClear,
            sessions.clone(),
        )),
    )?;

    let payment_gateway = ServiceId::new(PAYMENT_GATEWAY);
    let bank = manager.circuit_breaker_bank().clone();
    if !bank.is_configured(&payment_gateway) {
        manager.configure_circuit_breaker(payment_gateway.clone(), None)?;
    }

    let probe_bank = bank.clone();
    let probe_service = payment_gateway.clone();
    manager.register_health_check(
        HealthCheck::new(
            "payment-gateway-circuit",
            "Payment gateway circuit",
            "integration",
            probe_fn(move || {
                let snapshot = probe_bank.snapshot(&probe_service);
                async move {
                    match snapshot {
                        Some(s) if s.state == CircuitState::Open => Ok(CheckResult::unhealthy(
                            format!("circuit open after {} failures", s.failure_count),
                        )
                        .with_metric("failure_count", s.failure_count)),
                        Some(s) => {
                            Ok(CheckResult::healthy().with_metric("state", s.state.to_string()))
                        }
                        None => Ok(CheckResult::healthy()),
                    }
                }
            }),
        )
        .with_criticality(CriticalityLevel::High)
        .depends_on("reservations-db")
        .with_recovery_action(
            RecoveryAction::circuit_breaker_reset(
                "reset-payment-gateway",
                bank,
                payment_gateway,
            )
            .with_conditions(Duration::from_secs(600), 1),
        ),
    )?;

    Ok(vec![reservations, sessions])
}

fn reconnect_action(
    id: &str,
    name: &str,
    kind: RecoveryActionKind,
    store: Arc<SimulatedStore>,
) -> RecoveryAction {
    RecoveryAction::from_fn(id, name, kind, move || {
        let store = store.clone();
        async move {
            store.reconnect();
            Ok(ActionOutcome::success(format!("{} reconnected", store.name())))
        }
    })
}

async fn shutdown_signal() -> DaemonResult<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate.recv() => {
                info!("Received terminate signal, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaemonError;
    use hearth_health::{HealthError, LoadBalancerConfig, LoadBalancingAlgorithm};
    use hearth_types::{CheckId, InstanceHealth, ServiceInstance};

    #[test]
    fn test_demo_checks_registered() {
        let daemon = Daemon::new(DaemonConfig::default()).unwrap();
        let manager = daemon.manager();

        assert_eq!(manager.registry().len(), 3);
        assert_eq!(daemon.stores().len(), 2);
        assert!(manager
            .circuit_breaker_bank()
            .is_configured(&ServiceId::new(PAYMENT_GATEWAY)));

        let db = manager.registry().get(&CheckId::new("reservations-db")).unwrap();
        assert_eq!(db.criticality, CriticalityLevel::Critical);
        assert_eq!(db.automated_actions().count(), 1);
    }

    #[test]
    fn test_demo_disabled_and_pools_installed() {
        let mut config = DaemonConfig::default();
        config.demo.enabled = false;
        config.pools.push(
            LoadBalancerConfig::new("booking-api", LoadBalancingAlgorithm::RoundRobin).with_instance(
                ServiceInstance::new("booking-1", "http://10.0.1.1:8080")
                    .with_health(InstanceHealth::Healthy),
            ),
        );

        let daemon = Daemon::new(config).unwrap();
        assert!(daemon.manager().registry().is_empty());
        assert_eq!(
            daemon
                .manager()
                .select_instance(&ServiceId::new("booking-api"))
                .unwrap(),
            "http://10.0.1.1:8080"
        );
    }

    #[test]
    fn test_infinite_pool_weight_rejected() {
        let mut config = DaemonConfig::default();
        config.demo.enabled = false;
        config.pools.push(
            LoadBalancerConfig::new("booking-api", LoadBalancingAlgorithm::Weighted).with_instance(
                ServiceInstance::new("booking-1", "http://10.0.1.1:8080")
                    .with_health(InstanceHealth::Healthy)
                    .with_weight(f64::INFINITY),
            ),
        );

        assert!(matches!(
            Daemon::new(config),
            Err(DaemonError::Health(HealthError::Configuration(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_outage_is_healed() {
        let mut config = DaemonConfig::default();
        config.demo.outage_rate = 0.0;
        let daemon = Daemon::new(config).unwrap();
        let manager = daemon.manager().clone();

        daemon.stores()[0].disconnect();
        manager.run_checks_now();
        manager.wait_idle().await;

        assert!(daemon.stores()[0].is_connected());
        assert!(manager.list_active_failures().is_empty());
        assert_eq!(manager.list_resolved_failures().len(), 1);
    }
}
