//! Events emitted by the resilience subsystem.
//!
//! Circuit transitions, detected and resolved failures, recovery attempts and
//! escalations all flow through an [`EventSink`]. Delivery beyond the sink is
//! the application's business.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hearth_types::{CheckId, ServiceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::failures::SystemFailure;
use crate::resilience::RecoveryAttempt;

/// Event severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Resilience events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResilienceEvent {
    /// A check went unhealthy and a failure record was opened.
    FailureDetected { failure: SystemFailure },

    /// A failing check reported healthy again.
    FailureResolved { failure: SystemFailure },

    /// A recovery action ran against a failure.
    RecoveryAttempted {
        check_id: CheckId,
        attempt: RecoveryAttempt,
    },

    /// Automated recovery was exhausted without resolving the failure.
    RecoveryEscalated {
        failure: SystemFailure,
        reason: String,
    },

    /// Circuit transitioned to open.
    CircuitOpened {
        service_id: ServiceId,
        failure_count: u32,
        retry_at: Option<DateTime<Utc>>,
    },

    /// Circuit admitted its first trial call.
    CircuitHalfOpened { service_id: ServiceId },

    /// Circuit closed after successful trials.
    CircuitClosed { service_id: ServiceId },

    /// A scheduled check was skipped because its previous run is still going.
    CheckSkipped { check_id: CheckId, reason: String },
}

impl ResilienceEvent {
    /// Stable event type name.
    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceEvent::FailureDetected { .. } => "failure_detected",
            ResilienceEvent::FailureResolved { .. } => "failure_resolved",
            ResilienceEvent::RecoveryAttempted { .. } => "recovery_attempted",
            ResilienceEvent::RecoveryEscalated { .. } => "recovery_escalated",
            ResilienceEvent::CircuitOpened { .. } => "circuit_opened",
            ResilienceEvent::CircuitHalfOpened { .. } => "circuit_half_opened",
            ResilienceEvent::CircuitClosed { .. } => "circuit_closed",
            ResilienceEvent::CheckSkipped { .. } => "check_skipped",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            ResilienceEvent::FailureDetected { failure } if failure.severity.is_critical() => {
                EventSeverity::Error
            }
            ResilienceEvent::FailureDetected { .. } => EventSeverity::Warning,
            ResilienceEvent::FailureResolved { .. } => EventSeverity::Info,
            ResilienceEvent::RecoveryAttempted { .. } => EventSeverity::Info,
            ResilienceEvent::RecoveryEscalated { failure, .. } if failure.severity.is_critical() => {
                EventSeverity::Critical
            }
            ResilienceEvent::RecoveryEscalated { .. } => EventSeverity::Error,
            ResilienceEvent::CircuitOpened { .. } => EventSeverity::Warning,
            ResilienceEvent::CircuitHalfOpened { .. } => EventSeverity::Info,
            ResilienceEvent::CircuitClosed { .. } => EventSeverity::Info,
            ResilienceEvent::CheckSkipped { .. } => EventSeverity::Info,
        }
    }
}

/// Envelope wrapping delivered events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceEventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub event: ResilienceEvent,
}

impl ResilienceEventEnvelope {
    pub fn wrap(event: ResilienceEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: event.severity(),
            event,
        }
    }
}

/// Destination for resilience events.
///
/// `emit` is called while per-key state is locked, so implementations must
/// not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ResilienceEvent);
}

/// Sink that drops every event.
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: ResilienceEvent) {}
}

/// Sink that publishes enveloped events on a tokio broadcast channel.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<ResilienceEventEnvelope>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: ResilienceEvent) {
        // No subscribers is fine
        let _ = self.tx.send(ResilienceEventEnvelope::wrap(event));
    }
}

/// Sink that writes every event to the log.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ResilienceEvent) {
        let kind = event.kind();
        let payload = serde_json::to_string(&event).unwrap_or_else(|e| e.to_string());

        match event.severity() {
            EventSeverity::Info => info!(event = kind, %payload, "Resilience event"),
            EventSeverity::Warning => warn!(event = kind, %payload, "Resilience event"),
            EventSeverity::Error | EventSeverity::Critical => {
                error!(event = kind, %payload, "Resilience event")
            }
        }
    }
}

/// Sink that forwards every event to several sinks.
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: ResilienceEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Sink that keeps every event in memory, for inspection in tests.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Count events of a given kind.
    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: ResilienceEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_sink_wraps_events() {
        let sink = BroadcastEventSink::new(16);
        let mut rx = sink.subscribe();

        sink.emit(ResilienceEvent::CircuitClosed {
            service_id: ServiceId::new("payments"),
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.severity, EventSeverity::Info);
        assert_eq!(envelope.event.kind(), "circuit_closed");
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let sink = BroadcastEventSink::default();
        sink.emit(ResilienceEvent::CircuitHalfOpened {
            service_id: ServiceId::new("payments"),
        });
    }

    #[test]
    fn test_fanout_and_memory_sinks() {
        let first = Arc::new(MemoryEventSink::new());
        let second = Arc::new(MemoryEventSink::new());
        let fanout = FanoutEventSink::new(vec![first.clone(), second.clone()]);

        fanout.emit(ResilienceEvent::CircuitOpened {
            service_id: ServiceId::new("payments"),
            failure_count: 5,
            retry_at: None,
        });

        assert_eq!(first.count("circuit_opened"), 1);
        assert_eq!(second.events().len(), 1);
        assert_eq!(first.events()[0].severity(), EventSeverity::Warning);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ResilienceEvent::CheckSkipped {
            check_id: CheckId::new("db"),
            reason: "previous run in progress".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "check_skipped");
        assert_eq!(json["check_id"], "db");
    }
}
