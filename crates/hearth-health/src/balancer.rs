//! Instance selection for load-balanced services.
//!
//! Only healthy instances are ever returned. When none are healthy the caller
//! gets `NotAvailable` and decides for itself whether to degrade.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use hearth_types::{InstanceHealth, InstanceId, ServiceId, ServiceInstance};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HealthError, HealthResult};

/// Selection algorithm for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingAlgorithm {
    /// Rotate through healthy instances in configured order.
    #[default]
    RoundRobin,
    /// Fewest current connections, ties by instance id.
    LeastConnections,
    /// Random draw proportional to weight.
    Weighted,
    /// Highest health score, ties by instance id.
    HealthBased,
}

impl fmt::Display for LoadBalancingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancingAlgorithm::RoundRobin => write!(f, "round_robin"),
            LoadBalancingAlgorithm::LeastConnections => write!(f, "least_connections"),
            LoadBalancingAlgorithm::Weighted => write!(f, "weighted"),
            LoadBalancingAlgorithm::HealthBased => write!(f, "health_based"),
        }
    }
}

/// Pool definition for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub service_id: ServiceId,

    #[serde(default)]
    pub algorithm: LoadBalancingAlgorithm,

    #[serde(default)]
    pub instances: Vec<ServiceInstance>,
}

impl LoadBalancerConfig {
    pub fn new(service_id: impl Into<ServiceId>, algorithm: LoadBalancingAlgorithm) -> Self {
        Self {
            service_id: service_id.into(),
            algorithm,
            instances: Vec::new(),
        }
    }

    pub fn with_instance(mut self, instance: ServiceInstance) -> Self {
        self.instances.push(instance);
        self
    }
}

struct Pool {
    algorithm: LoadBalancingAlgorithm,
    instances: RwLock<Vec<ServiceInstance>>,

    /// Round-robin position, persisted across calls.
    cursor: AtomicUsize,
}

/// Picks one healthy instance per call from a configured pool.
pub struct InstanceSelector {
    pools: DashMap<ServiceId, Arc<Pool>>,
    rng: Mutex<StdRng>,
}

impl Default for InstanceSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceSelector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Selector with a fixed random seed, for reproducible weighted draws.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            pools: DashMap::new(),
            rng: Mutex::new(rng),
        }
    }

    /// Install or replace a pool. Replacing resets the rotation.
    ///
    /// Fails with `Configuration` if any instance carries a negative or
    /// non-finite weight, or a non-finite health score.
    pub fn configure(&self, config: LoadBalancerConfig) -> HealthResult<()> {
        for instance in &config.instances {
            validate_instance(&config.service_id, instance)?;
        }

        info!(
            service_id = %config.service_id,
            algorithm = %config.algorithm,
            instances = config.instances.len(),
            "Configuring instance pool"
        );

        let pool = Pool {
            algorithm: config.algorithm,
            instances: RwLock::new(config.instances),
            cursor: AtomicUsize::new(0),
        };
        self.pools.insert(config.service_id, Arc::new(pool));
        Ok(())
    }

    pub fn is_configured(&self, service_id: &ServiceId) -> bool {
        self.pools.contains_key(service_id)
    }

    /// Insert or replace an instance by id. Returns false for an unknown
    /// service.
    pub fn update_instance(
        &self,
        service_id: &ServiceId,
        instance: ServiceInstance,
    ) -> HealthResult<bool> {
        let Some(pool) = self.pool(service_id) else {
            return Ok(false);
        };
        validate_instance(service_id, &instance)?;

        let mut instances = pool.instances.write();
        match instances.iter_mut().find(|i| i.id == instance.id) {
            Some(existing) => *existing = instance,
            None => instances.push(instance),
        }
        Ok(true)
    }

    /// Refresh just the health of one instance.
    pub fn set_health(
        &self,
        service_id: &ServiceId,
        instance_id: &InstanceId,
        health: InstanceHealth,
    ) -> bool {
        let Some(pool) = self.pool(service_id) else {
            return false;
        };

        let mut instances = pool.instances.write();
        match instances.iter_mut().find(|i| &i.id == instance_id) {
            Some(instance) => {
                if instance.health != health {
                    debug!(
                        service_id = %service_id,
                        instance_id = %instance_id,
                        from = %instance.health,
                        to = %health,
                        "Instance health changed"
                    );
                }
                instance.health = health;
                true
            }
            None => false,
        }
    }

    pub fn instances(&self, service_id: &ServiceId) -> Vec<ServiceInstance> {
        self.pool(service_id)
            .map(|pool| pool.instances.read().clone())
            .unwrap_or_default()
    }

    /// Configured services, ordered by id.
    pub fn services(&self) -> Vec<ServiceId> {
        let mut services: Vec<_> = self.pools.iter().map(|p| p.key().clone()).collect();
        services.sort();
        services
    }

    /// Pick a healthy instance.
    pub fn select(&self, service_id: &ServiceId) -> HealthResult<ServiceInstance> {
        let pool = self
            .pool(service_id)
            .ok_or_else(|| HealthError::NotAvailable(service_id.clone()))?;

        let mut healthy: Vec<ServiceInstance> = pool
            .instances
            .read()
            .iter()
            .filter(|i| i.is_healthy())
            .cloned()
            .collect();

        if healthy.is_empty() {
            debug!(service_id = %service_id, "No healthy instance available");
            return Err(HealthError::NotAvailable(service_id.clone()));
        }

        let index = match pool.algorithm {
            LoadBalancingAlgorithm::RoundRobin => {
                pool.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len()
            }
            LoadBalancingAlgorithm::LeastConnections => least_connections(&healthy),
            LoadBalancingAlgorithm::Weighted => self.weighted(&healthy),
            LoadBalancingAlgorithm::HealthBased => self.health_based(&healthy),
        };

        Ok(healthy.swap_remove(index))
    }

    fn pool(&self, service_id: &ServiceId) -> Option<Arc<Pool>> {
        self.pools.get(service_id).map(|p| p.clone())
    }

    fn weighted(&self, healthy: &[ServiceInstance]) -> usize {
        // Scale by the largest weight so the sum stays finite.
        let largest = healthy.iter().map(usable_weight).fold(0.0, f64::max);
        let mut rng = self.rng.lock();

        if largest <= 0.0 {
            return rng.gen_range(0..healthy.len());
        }

        let total: f64 = healthy.iter().map(|i| usable_weight(i) / largest).sum();
        let draw = rng.gen_range(0.0..total);
        let mut cumulative = 0.0;
        for (index, instance) in healthy.iter().enumerate() {
            cumulative += usable_weight(instance) / largest;
            if draw < cumulative {
                return index;
            }
        }
        healthy.len() - 1
    }

    fn health_based(&self, healthy: &[ServiceInstance]) -> usize {
        if healthy.iter().all(|i| usable_score(i).is_none()) {
            return self.rng.lock().gen_range(0..healthy.len());
        }

        healthy
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                let score_a = usable_score(a).unwrap_or(0.0);
                let score_b = usable_score(b).unwrap_or(0.0);
                score_a
                    .total_cmp(&score_b)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    }
}

fn validate_instance(service_id: &ServiceId, instance: &ServiceInstance) -> HealthResult<()> {
    if !instance.weight.is_finite() || instance.weight < 0.0 {
        return Err(HealthError::Configuration(format!(
            "{} instance {}: weight must be a finite non-negative number, got {}",
            service_id, instance.id, instance.weight
        )));
    }

    if let Some(score) = instance.health_score.filter(|s| !s.is_finite()) {
        return Err(HealthError::Configuration(format!(
            "{} instance {}: health score must be finite, got {}",
            service_id, instance.id, score
        )));
    }

    Ok(())
}

/// Weight used for drawing; anything unusable counts as zero.
fn usable_weight(instance: &ServiceInstance) -> f64 {
    if instance.weight.is_finite() && instance.weight > 0.0 {
        instance.weight
    } else {
        0.0
    }
}

fn usable_score(instance: &ServiceInstance) -> Option<f64> {
    instance.health_score.filter(|s| s.is_finite())
}

fn least_connections(healthy: &[ServiceInstance]) -> usize {
    healthy
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.current_load
                .cmp(&b.current_load)
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|(index, _)| index)
        .unwrap_or(0)
}

impl fmt::Debug for InstanceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceSelector")
            .field("services", &self.services())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy(id: &str) -> ServiceInstance {
        ServiceInstance::new(id, format!("http://{}:8080", id)).with_health(InstanceHealth::Healthy)
    }

    fn pool(algorithm: LoadBalancingAlgorithm, instances: Vec<ServiceInstance>) -> (InstanceSelector, ServiceId) {
        let selector = InstanceSelector::with_seed(7);
        let service = ServiceId::new("booking-api");
        let mut config = LoadBalancerConfig::new(service.clone(), algorithm);
        config.instances = instances;
        selector.configure(config).unwrap();
        (selector, service)
    }

    fn pick(selector: &InstanceSelector, service: &ServiceId) -> String {
        selector.select(service).unwrap().id.as_str().to_string()
    }

    #[test]
    fn test_round_robin_rotates() {
        let (selector, service) = pool(
            LoadBalancingAlgorithm::RoundRobin,
            vec![healthy("a"), healthy("b"), healthy("c")],
        );

        let picks: Vec<_> = (0..6).map(|_| pick(&selector, &service)).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_unhealthy_instances_never_selected() {
        let (selector, service) = pool(
            LoadBalancingAlgorithm::RoundRobin,
            vec![
                healthy("a"),
                ServiceInstance::new("b", "http://b:8080").with_health(InstanceHealth::Unhealthy),
                ServiceInstance::new("c", "http://c:8080"),
            ],
        );

        for _ in 0..4 {
            assert_eq!(pick(&selector, &service), "a");
        }
    }

    #[test]
    fn test_no_healthy_instance_is_not_available() {
        let (selector, service) = pool(
            LoadBalancingAlgorithm::LeastConnections,
            vec![ServiceInstance::new("a", "http://a:8080").with_health(InstanceHealth::Unhealthy)],
        );
        assert!(matches!(
            selector.select(&service),
            Err(HealthError::NotAvailable(_))
        ));

        assert!(selector.set_health(&service, &InstanceId::new("a"), InstanceHealth::Healthy));
        assert_eq!(pick(&selector, &service), "a");
    }

    #[test]
    fn test_unconfigured_service_is_not_available() {
        let selector = InstanceSelector::new();
        assert!(matches!(
            selector.select(&ServiceId::new("unknown")),
            Err(HealthError::NotAvailable(_))
        ));
        assert!(!selector
            .update_instance(&ServiceId::new("unknown"), healthy("a"))
            .unwrap());
    }

    #[test]
    fn test_least_connections_breaks_ties_by_id() {
        let (selector, service) = pool(
            LoadBalancingAlgorithm::LeastConnections,
            vec![
                healthy("c").with_load(2),
                healthy("b").with_load(2),
                healthy("a").with_load(5),
            ],
        );
        assert_eq!(pick(&selector, &service), "b");

        selector
            .update_instance(&service, healthy("a").with_load(0))
            .unwrap();
        assert_eq!(pick(&selector, &service), "a");
    }

    #[test]
    fn test_weighted_follows_weights() {
        let (selector, service) = pool(
            LoadBalancingAlgorithm::Weighted,
            vec![healthy("heavy").with_weight(3.0), healthy("light").with_weight(1.0)],
        );

        let heavy = (0..4000)
            .filter(|_| pick(&selector, &service) == "heavy")
            .count();
        assert!((2700..=3300).contains(&heavy), "heavy picked {} times", heavy);
    }

    #[test]
    fn test_weighted_zero_weight_never_picked() {
        let (selector, service) = pool(
            LoadBalancingAlgorithm::Weighted,
            vec![healthy("off").with_weight(0.0), healthy("on").with_weight(2.0)],
        );
        for _ in 0..100 {
            assert_eq!(pick(&selector, &service), "on");
        }
    }

    #[test]
    fn test_health_based_prefers_highest_score() {
        let (selector, service) = pool(
            LoadBalancingAlgorithm::HealthBased,
            vec![
                healthy("a").with_health_score(0.4),
                healthy("c").with_health_score(0.9),
                healthy("b").with_health_score(0.9),
            ],
        );
        assert_eq!(pick(&selector, &service), "b");
    }

    #[test]
    fn test_reconfigure_and_list_instances() {
        let (selector, service) = pool(LoadBalancingAlgorithm::RoundRobin, vec![healthy("a")]);
        assert!(selector.update_instance(&service, healthy("b")).unwrap());
        assert_eq!(selector.instances(&service).len(), 2);

        selector
            .configure(
                LoadBalancerConfig::new(service.clone(), LoadBalancingAlgorithm::RoundRobin)
                    .with_instance(healthy("z")),
            )
            .unwrap();
        assert_eq!(selector.instances(&service).len(), 1);
        assert_eq!(selector.services(), vec![service]);
    }

    #[test]
    fn test_weighted_huge_weights_do_not_overflow() {
        let (selector, service) = pool(
            LoadBalancingAlgorithm::Weighted,
            vec![
                healthy("a").with_weight(f64::MAX),
                healthy("b").with_weight(f64::MAX),
            ],
        );

        let a = (0..1000).filter(|_| pick(&selector, &service) == "a").count();
        assert!((400..=600).contains(&a), "a picked {} times", a);
    }

    #[test]
    fn test_unusable_weights_rejected() {
        let selector = InstanceSelector::with_seed(7);
        let service = ServiceId::new("booking-api");

        for weight in [f64::INFINITY, f64::NAN, -1.0] {
            let config = LoadBalancerConfig::new(service.clone(), LoadBalancingAlgorithm::Weighted)
                .with_instance(healthy("a").with_weight(weight));
            assert!(matches!(
                selector.configure(config),
                Err(HealthError::Configuration(_))
            ));
        }
        assert!(!selector.is_configured(&service));

        selector
            .configure(LoadBalancerConfig::new(service.clone(), LoadBalancingAlgorithm::Weighted))
            .unwrap();
        assert!(matches!(
            selector.update_instance(&service, healthy("a").with_weight(f64::INFINITY)),
            Err(HealthError::Configuration(_))
        ));
        assert!(selector.instances(&service).is_empty());
    }

    #[test]
    fn test_nan_health_score_rejected_and_never_preferred() {
        let selector = InstanceSelector::with_seed(7);
        let service = ServiceId::new("booking-api");

        let mut nan = healthy("nan");
        nan.health_score = Some(f64::NAN);
        let config = LoadBalancerConfig::new(service.clone(), LoadBalancingAlgorithm::HealthBased)
            .with_instance(healthy("good").with_health_score(0.9))
            .with_instance(nan.clone());
        assert!(matches!(
            selector.configure(config),
            Err(HealthError::Configuration(_))
        ));

        let (selector, service) = pool(
            LoadBalancingAlgorithm::HealthBased,
            vec![healthy("good").with_health_score(0.9)],
        );
        // Written straight into the pool, skipping validation
        selector.pool(&service).unwrap().instances.write().push(nan);
        for _ in 0..10 {
            assert_eq!(pick(&selector, &service), "good");
        }
    }
}
