//! Configuration for hearth-daemon

use std::time::Duration;

use hearth_health::{CircuitBreakerConfig, LoadBalancerConfig, ResilienceConfig};
use hearth_types::ServiceId;
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Resilience tuning
    #[serde(default)]
    pub resilience: ResilienceSettings,

    /// Services guarded by circuit breakers
    #[serde(default)]
    pub circuit_breakers: Vec<GuardedServiceConfig>,

    /// Load-balanced service pools
    #[serde(default)]
    pub pools: Vec<LoadBalancerConfig>,

    /// Built-in demo checks
    #[serde(default)]
    pub demo: DemoConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resilience tuning, in whole seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Health check interval in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Probe timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Enable automated recovery
    #[serde(default = "default_true")]
    pub recovery_enabled: bool,

    /// Wait before verifying a recovery action, in seconds
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Recovery action timeout in seconds
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    /// Default cooldown window in seconds
    #[serde(default = "default_cooldown_window")]
    pub cooldown_window_secs: u64,

    /// Default attempts per cooldown window
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_window: u32,

    /// Retry recovery when a failure persists across ticks
    #[serde(default = "default_true")]
    pub retry_on_persisting: bool,

    /// Default breaker failure threshold
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Default breaker open duration in seconds
    #[serde(default = "default_open_duration")]
    pub open_duration_secs: u64,

    /// Default breaker half-open success threshold
    #[serde(default = "default_half_open_successes")]
    pub half_open_success_threshold: u32,

    /// Cleanup interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Resolved failures kept in history
    #[serde(default = "default_history_limit")]
    pub resolved_history_limit: usize,

    /// Interval between logged health reports in seconds (0 disables)
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            probe_timeout_secs: default_probe_timeout(),
            recovery_enabled: true,
            grace_period_secs: default_grace_period(),
            action_timeout_secs: default_action_timeout(),
            cooldown_window_secs: default_cooldown_window(),
            max_attempts_per_window: default_max_attempts(),
            retry_on_persisting: true,
            failure_threshold: default_failure_threshold(),
            open_duration_secs: default_open_duration(),
            half_open_success_threshold: default_half_open_successes(),
            cleanup_interval_secs: default_cleanup_interval(),
            resolved_history_limit: default_history_limit(),
            report_interval_secs: default_report_interval(),
        }
    }
}

/// A service guarded by a circuit breaker. Unset values use the defaults
/// from [`ResilienceSettings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardedServiceConfig {
    pub service_id: ServiceId,

    #[serde(default)]
    pub failure_threshold: Option<u32>,

    #[serde(default)]
    pub open_duration_secs: Option<u64>,

    #[serde(default)]
    pub half_open_success_threshold: Option<u32>,
}

impl GuardedServiceConfig {
    /// Breaker configuration, or `None` to use the bank default.
    pub fn breaker_config(&self, defaults: &CircuitBreakerConfig) -> Option<CircuitBreakerConfig> {
        if self.failure_threshold.is_none()
            && self.open_duration_secs.is_none()
            && self.half_open_success_threshold.is_none()
        {
            return None;
        }

        Some(CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            open_duration: self
                .open_duration_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.open_duration),
            half_open_success_threshold: self
                .half_open_success_threshold
                .unwrap_or(defaults.half_open_success_threshold),
        })
    }
}

/// Demo checks against simulated stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Register the demo checks
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Chance that a healthy simulated store drops its connection on a ping
    #[serde(default = "default_outage_rate")]
    pub outage_rate: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            outage_rate: default_outage_rate(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_grace_period() -> u64 {
    5
}

fn default_action_timeout() -> u64 {
    30
}

fn default_cooldown_window() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_duration() -> u64 {
    30
}

fn default_half_open_successes() -> u32 {
    3
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_history_limit() -> usize {
    256
}

fn default_report_interval() -> u64 {
    60
}

fn default_outage_rate() -> f64 {
    0.05
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `HEARTH_`-prefixed environment variables (`__` between sections).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Self::defaults_builder()?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("HEARTH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    fn defaults_builder(
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        Ok(config::Config::builder().add_source(config::Config::try_from(&DaemonConfig::default())?))
    }

    /// Library configuration derived from the daemon settings.
    pub fn to_resilience_config(&self) -> ResilienceConfig {
        let s = &self.resilience;
        let mut config = ResilienceConfig::default();

        config.scheduler.check_interval = Duration::from_secs(s.check_interval_secs);
        config.scheduler.probe_timeout = Duration::from_secs(s.probe_timeout_secs);

        config.recovery.enabled = s.recovery_enabled;
        config.recovery.grace_period = Duration::from_secs(s.grace_period_secs);
        config.recovery.action_timeout = Duration::from_secs(s.action_timeout_secs);
        config.recovery.default_cooldown_window = Duration::from_secs(s.cooldown_window_secs);
        config.recovery.default_max_attempts_per_window = s.max_attempts_per_window;
        config.recovery.retry_on_persisting = s.retry_on_persisting;

        config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: s.failure_threshold,
            open_duration: Duration::from_secs(s.open_duration_secs),
            half_open_success_threshold: s.half_open_success_threshold,
        };

        config.maintenance.cleanup_interval = Duration::from_secs(s.cleanup_interval_secs);
        config.maintenance.resolved_history_limit = s.resolved_history_limit;

        config
    }
}
