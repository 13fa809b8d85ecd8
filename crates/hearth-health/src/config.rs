//! Resilience configuration.
//!
//! Defines configuration for the scheduler, recovery, circuit breakers and
//! periodic maintenance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HealthError, HealthResult};

/// Configuration for the whole resilience subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Health check scheduling.
    pub scheduler: SchedulerConfig,

    /// Automated recovery.
    pub recovery: RecoveryConfig,

    /// Defaults for circuit breakers configured without explicit values.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Periodic cleanup.
    pub maintenance: MaintenanceConfig,
}

impl ResilienceConfig {
    /// Short intervals for local development and demos.
    pub fn development() -> Self {
        let mut config = Self::default();
        config.scheduler.check_interval = Duration::from_secs(5);
        config.recovery.grace_period = Duration::from_secs(1);
        config.recovery.default_cooldown_window = Duration::from_secs(30);
        config.circuit_breaker.open_duration = Duration::from_secs(5);
        config.maintenance.cleanup_interval = Duration::from_secs(15);
        config
    }

    /// Reject values that would make the subsystem misbehave.
    pub fn validate(&self) -> HealthResult<()> {
        if self.scheduler.check_interval.is_zero() {
            return Err(HealthError::Configuration(
                "scheduler.check_interval must be non-zero".to_string(),
            ));
        }
        if self.scheduler.probe_timeout.is_zero() {
            return Err(HealthError::Configuration(
                "scheduler.probe_timeout must be non-zero".to_string(),
            ));
        }
        if self.recovery.action_timeout.is_zero() {
            return Err(HealthError::Configuration(
                "recovery.action_timeout must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recovery.neutral_success_prior) {
            return Err(HealthError::Configuration(format!(
                "recovery.neutral_success_prior must be within [0, 1], got {}",
                self.recovery.neutral_success_prior
            )));
        }
        if self.recovery.default_max_attempts_per_window == 0 {
            return Err(HealthError::Configuration(
                "recovery.default_max_attempts_per_window must be at least 1".to_string(),
            ));
        }
        if self.maintenance.cleanup_interval.is_zero() {
            return Err(HealthError::Configuration(
                "maintenance.cleanup_interval must be non-zero".to_string(),
            ));
        }
        self.circuit_breaker.validate()
    }
}

/// Health check scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between scheduling ticks.
    pub check_interval: Duration,

    /// Upper bound on a single probe execution.
    pub probe_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Automated recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Enable automatic recovery when a failure is detected.
    pub enabled: bool,

    /// Wait between a successful action and the verification probe.
    pub grace_period: Duration,

    /// Upper bound on a single recovery action; a hung action counts as failed.
    pub action_timeout: Duration,

    /// Success rate assumed for actions with no history.
    pub neutral_success_prior: f64,

    /// Cooldown window for actions registered without conditions.
    pub default_cooldown_window: Duration,

    /// Attempts per window for actions registered without conditions.
    pub default_max_attempts_per_window: u32,

    /// Start another recovery cycle when a still-failing check is re-detected.
    pub retry_on_persisting: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_period: Duration::from_secs(5),
            action_timeout: Duration::from_secs(30),
            neutral_success_prior: 0.5,
            default_cooldown_window: Duration::from_secs(300),
            default_max_attempts_per_window: 3,
            retry_on_persisting: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures that opens the circuit.
    pub failure_threshold: u32,

    /// Time to stay open before admitting a trial call.
    pub open_duration: Duration,

    /// Number of successful trial calls that closes the circuit.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> HealthResult<()> {
        if self.failure_threshold == 0 {
            return Err(HealthError::Configuration(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_success_threshold == 0 {
            return Err(HealthError::Configuration(
                "circuit_breaker.half_open_success_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Periodic cleanup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Interval between cleanup sweeps.
    pub cleanup_interval: Duration,

    /// Number of resolved failures kept for inspection.
    pub resolved_history_limit: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
            resolved_history_limit: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.scheduler.check_interval, Duration::from_secs(30));
        assert_eq!(config.scheduler.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.half_open_success_threshold, 3);
        assert_eq!(config.recovery.neutral_success_prior, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_is_faster() {
        let dev = ResilienceConfig::development();
        let prod = ResilienceConfig::default();
        assert!(dev.scheduler.check_interval < prod.scheduler.check_interval);
        assert!(dev.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ResilienceConfig::default();
        config.recovery.neutral_success_prior = 1.5;
        assert!(matches!(
            config.validate(),
            Err(HealthError::Configuration(_))
        ));

        let mut config = ResilienceConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = ResilienceConfig::default();
        config.scheduler.check_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
