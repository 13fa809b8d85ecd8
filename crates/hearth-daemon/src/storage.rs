//! Simulated backing stores for the demo checks.
//!
//! Each store answers pings until it randomly drops its connection, then
//! stays down until a recovery action reconnects it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use hearth_health::Store;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

/// In-memory store with injectable outages.
pub struct SimulatedStore {
    name: String,
    connected: AtomicBool,
    outage_rate: f64,
    reconnects: AtomicU64,
    rng: Mutex<StdRng>,
}

impl SimulatedStore {
    pub fn new(name: impl Into<String>, outage_rate: f64) -> Self {
        Self::with_rng(name, outage_rate, StdRng::from_entropy())
    }

    /// Store with a fixed seed for reproducible outages.
    pub fn seeded(name: impl Into<String>, outage_rate: f64, seed: u64) -> Self {
        Self::with_rng(name, outage_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(name: impl Into<String>, outage_rate: f64, rng: StdRng) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            outage_rate: if outage_rate.is_nan() {
                0.0
            } else {
                outage_rate.clamp(0.0, 1.0)
            },
            reconnects: AtomicU64::new(0),
            rng: Mutex::new(rng),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Drop the connection.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(store = %self.name, "Simulated store lost its connection");
        }
    }

    /// Re-establish the connection. Safe to call repeatedly.
    pub fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!(store = %self.name, "Simulated store reconnected");
        }
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for SimulatedStore {
    async fn ping(&self) -> Result<(), String> {
        if self.is_connected() && self.rng.lock().gen_bool(self.outage_rate) {
            self.disconnect();
        }

        if self.is_connected() {
            Ok(())
        } else {
            Err(format!("{}: connection refused", self.name))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outage_until_reconnect() {
        let store = SimulatedStore::seeded("reservations-db", 1.0, 1);
        assert!(store.ping().await.is_err());
        assert!(store.ping().await.is_err());

        // Reconnecting is immediately undone by the next forced outage
        store.reconnect();
        assert!(store.is_connected());
        assert_eq!(store.reconnect_count(), 1);
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_never_fails_with_zero_rate() {
        let store = SimulatedStore::seeded("session-cache", 0.0, 1);
        for _ in 0..100 {
            assert!(store.ping().await.is_ok());
        }
        store.disconnect();
        assert!(store.ping().await.is_err());
    }
}
