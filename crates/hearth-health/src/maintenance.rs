//! Periodic cleanup of bookkeeping that would otherwise grow without bound.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::MaintenanceConfig;
use crate::failures::FailureTracker;
use crate::resilience::RecoveryOrchestrator;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub cooldowns_pruned: usize,
    pub resolved_trimmed: usize,
}

/// Background sweep over cooldown logs and resolved-failure history.
pub struct MaintenanceTask {
    tracker: Arc<FailureTracker>,
    orchestrator: Arc<RecoveryOrchestrator>,
    config: MaintenanceConfig,
}

impl MaintenanceTask {
    pub fn new(
        tracker: Arc<FailureTracker>,
        orchestrator: Arc<RecoveryOrchestrator>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            tracker,
            orchestrator,
            config,
        }
    }

    pub fn sweep(&self) -> SweepSummary {
        let summary = SweepSummary {
            cooldowns_pruned: self.orchestrator.prune_cooldowns(),
            resolved_trimmed: self.tracker.trim_resolved(self.config.resolved_history_limit),
        };
        if summary != SweepSummary::default() {
            debug!(
                cooldowns_pruned = summary.cooldowns_pruned,
                resolved_trimmed = summary.resolved_trimmed,
                "Maintenance sweep"
            );
        }
        summary
    }

    /// Sweep every `cleanup_interval` until `stop` flips to true.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; nothing to clean yet
        ticker.tick().await;

        info!(
            interval_ms = self.config.cleanup_interval.as_millis() as u64,
            "Maintenance task started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Maintenance task stopped");
    }
}
