//! # Coordinator Configuration
//!
//! Configuration consumed by the coordinator core: queue sizing, recovery
//! scheduling and the repository namespace.

use serde::Deserialize;
use std::time::Duration;

use crate::codec::CodecType;
use crate::error::{CoordinatorError, Result};

fn default_queue_capacity() -> usize {
    5000
}

fn default_worker_threads() -> usize {
    num_cpus::get() * 2
}

fn default_recovery_initial_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_recovery_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_recovery_threshold() -> Duration {
    Duration::from_secs(60)
}

/// Configuration for the coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum number of actions waiting in the coordinator log.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of lane workers draining the log.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Run the recovery scheduler. Only initiators should enable this.
    #[serde(default)]
    pub recovery_enabled: bool,
    /// Delay before the first recovery tick.
    #[serde(default = "default_recovery_initial_delay")]
    pub recovery_initial_delay: Duration,
    /// Delay between the end of one tick and the start of the next.
    #[serde(default = "default_recovery_interval")]
    pub recovery_interval: Duration,
    /// Age a Begin record must reach before recovery resends it.
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: Duration,
    /// Repository namespace suffix. Blank means "use the application name".
    #[serde(default)]
    pub repository_suffix: String,
    /// Wire codec for compensation messages and tokens.
    #[serde(default)]
    pub codec: CodecType,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_threads: default_worker_threads(),
            recovery_enabled: false,
            recovery_initial_delay: default_recovery_initial_delay(),
            recovery_interval: default_recovery_interval(),
            recovery_threshold: default_recovery_threshold(),
            repository_suffix: String::new(),
            codec: CodecType::Json,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn with_recovery(mut self, enabled: bool) -> Self {
        self.recovery_enabled = enabled;
        self
    }

    pub fn with_recovery_initial_delay(mut self, delay: Duration) -> Self {
        self.recovery_initial_delay = delay;
        self
    }

    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    pub fn with_recovery_threshold(mut self, threshold: Duration) -> Self {
        self.recovery_threshold = threshold;
        self
    }

    pub fn with_repository_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.repository_suffix = suffix.into();
        self
    }

    pub fn with_codec(mut self, codec: CodecType) -> Self {
        self.codec = codec;
        self
    }

    /// Reject settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(CoordinatorError::Configuration(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(CoordinatorError::Configuration(
                "worker_threads must be greater than zero".to_string(),
            ));
        }
        if self.recovery_enabled && self.recovery_interval.is_zero() {
            return Err(CoordinatorError::Configuration(
                "recovery_interval must be greater than zero when recovery is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Namespace suffix handed to the repository.
    pub fn resolve_repository_suffix(&self, identity: &dyn ApplicationIdentity) -> String {
        if self.repository_suffix.trim().is_empty() {
            identity.name()
        } else {
            self.repository_suffix.clone()
        }
    }
}

/// Supplies the application name used as the default repository namespace.
pub trait ApplicationIdentity: Send + Sync {
    fn name(&self) -> String;
}

/// Fixed application name.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl ApplicationIdentity for StaticIdentity {
    fn name(&self) -> String {
        self.0.clone()
    }
}

/// Derives the application name from the running executable.
#[derive(Debug, Clone, Default)]
pub struct ProcessIdentity;

impl ApplicationIdentity for ProcessIdentity {
    fn name(&self) -> String {
        std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "saga-coordinator".to_string())
    }
}

/// Environment-based configuration loader
#[derive(Debug, Clone)]
pub struct EnvConfig;

impl EnvConfig {
    /// Load CoordinatorConfig from environment variables
    pub fn load_coordinator_config() -> CoordinatorConfig {
        let defaults = CoordinatorConfig::default();
        CoordinatorConfig::new()
            .with_queue_capacity(env_parse(
                "SAGA_COORDINATOR_QUEUE_CAPACITY",
                defaults.queue_capacity,
            ))
            .with_worker_threads(env_parse(
                "SAGA_COORDINATOR_WORKER_THREADS",
                defaults.worker_threads,
            ))
            .with_recovery(env_parse(
                "SAGA_COORDINATOR_RECOVERY_ENABLED",
                defaults.recovery_enabled,
            ))
            .with_recovery_initial_delay(Duration::from_secs(env_parse(
                "SAGA_COORDINATOR_RECOVERY_INITIAL_DELAY_SECS",
                defaults.recovery_initial_delay.as_secs(),
            )))
            .with_recovery_interval(Duration::from_secs(env_parse(
                "SAGA_COORDINATOR_RECOVERY_INTERVAL_SECS",
                defaults.recovery_interval.as_secs(),
            )))
            .with_recovery_threshold(Duration::from_secs(env_parse(
                "SAGA_COORDINATOR_RECOVERY_THRESHOLD_SECS",
                defaults.recovery_threshold.as_secs(),
            )))
            .with_repository_suffix(
                std::env::var("SAGA_COORDINATOR_REPOSITORY_SUFFIX").unwrap_or_default(),
            )
            .with_codec(env_parse("SAGA_COORDINATOR_CODEC", defaults.codec))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable configuration value");
                default
            }
        },
        Err(_) => default,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_config_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.queue_capacity, 5000);
        assert!(config.worker_threads >= 2);
        assert!(!config.recovery_enabled);
        assert_eq!(config.recovery_initial_delay, Duration::from_secs(30));
        assert_eq!(config.recovery_interval, Duration::from_secs(60));
        assert_eq!(config.recovery_threshold, Duration::from_secs(60));
        assert_eq!(config.codec, CodecType::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coordinator_config_builder() {
        let config = CoordinatorConfig::new()
            .with_queue_capacity(2)
            .with_worker_threads(4)
            .with_recovery(true)
            .with_recovery_threshold(Duration::from_secs(5))
            .with_repository_suffix("orders");

        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.worker_threads, 4);
        assert!(config.recovery_enabled);
        assert_eq!(config.recovery_threshold, Duration::from_secs(5));
        assert_eq!(config.repository_suffix, "orders");
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(matches!(
            CoordinatorConfig::new().with_queue_capacity(0).validate(),
            Err(CoordinatorError::Configuration(_))
        ));
        assert!(matches!(
            CoordinatorConfig::new().with_worker_threads(0).validate(),
            Err(CoordinatorError::Configuration(_))
        ));
        assert!(
            CoordinatorConfig::new()
                .with_recovery(true)
                .with_recovery_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_repository_suffix_falls_back_to_identity() {
        let identity = StaticIdentity("payment-service".to_string());
        assert_eq!(
            CoordinatorConfig::new().resolve_repository_suffix(&identity),
            "payment-service"
        );
        assert_eq!(
            CoordinatorConfig::new()
                .with_repository_suffix("  ")
                .resolve_repository_suffix(&identity),
            "payment-service"
        );
        assert_eq!(
            CoordinatorConfig::new()
                .with_repository_suffix("orders")
                .resolve_repository_suffix(&identity),
            "orders"
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"queue_capacity": 16, "recovery_enabled": true}"#).unwrap();
        assert_eq!(config.queue_capacity, 16);
        assert!(config.recovery_enabled);
        assert_eq!(config.recovery_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_env_config_load() {
        // Set environment variables
        unsafe {
            std::env::set_var("SAGA_COORDINATOR_QUEUE_CAPACITY", "64");
            std::env::set_var("SAGA_COORDINATOR_WORKER_THREADS", "3");
            std::env::set_var("SAGA_COORDINATOR_RECOVERY_ENABLED", "true");
            std::env::set_var("SAGA_COORDINATOR_RECOVERY_THRESHOLD_SECS", "not-a-number");
        }

        let config = EnvConfig::load_coordinator_config();

        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.worker_threads, 3);
        assert!(config.recovery_enabled);
        assert_eq!(config.recovery_threshold, Duration::from_secs(60));

        // Clean up
        unsafe {
            std::env::remove_var("SAGA_COORDINATOR_QUEUE_CAPACITY");
            std::env::remove_var("SAGA_COORDINATOR_WORKER_THREADS");
            std::env::remove_var("SAGA_COORDINATOR_RECOVERY_ENABLED");
            std::env::remove_var("SAGA_COORDINATOR_RECOVERY_THRESHOLD_SECS");
        }
    }
}
