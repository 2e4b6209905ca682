//! # Telemetry Module
//!
//! Tracing setup for the coordinator.
//!
//! ```rust,ignore
//! use saga_coordinator_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```

use tracing::{Level, Span, span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::error::{CoordinatorError, Result};
use crate::model::{TransId, TransactionRole};

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on the startup event
    pub service_name: String,
    /// Log level filter, e.g. `info` or `saga_coordinator_core=debug`
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "saga-coordinator".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Use `RUST_LOG` when set, otherwise the default level.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var(EnvFilter::DEFAULT_ENV) {
            config.log_level = level;
        }
        config
    }
}

/// Telemetry guard - keep alive for the lifetime of the process
#[derive(Debug)]
pub struct TelemetryGuard;

impl TelemetryGuard {
    /// Shutdown telemetry
    pub fn shutdown(self) {}
}

/// Install the global subscriber.
///
/// Fails if a global subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| CoordinatorError::Configuration(e.to_string()))?;

    Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| CoordinatorError::Configuration(e.to_string()))?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(TelemetryGuard)
}

/// Span covering work done on behalf of one transaction.
pub fn transaction_span(trans_id: &TransId, role: TransactionRole, action: &str) -> Span {
    span!(
        Level::INFO,
        "saga.transaction",
        saga.trans_id = %trans_id,
        saga.role = %role,
        saga.action = action,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "saga-coordinator");
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = TelemetryConfig {
            log_level: "saga_coordinator_core=verbose".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            init_telemetry(&config),
            Err(CoordinatorError::Configuration(_))
        ));
    }

    #[test]
    fn test_transaction_span_builds_without_subscriber() {
        let span = transaction_span(&TransId::from("t-1"), TransactionRole::Local, "compensate");
        let _entered = span.enter();
    }
}
