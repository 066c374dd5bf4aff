//! # Designer Telemetry
//!
//! Logging and metrics for the workflow designer.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, human-readable or JSON
//! - **Metrics**: Prometheus counters and gauges under the `designer_` prefix
//!
//! ## Usage
//!
//! ```rust,ignore
//! use designer_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::from_env())?;
//!     // Logs and metrics are now being collected
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DESIGNER_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `DESIGNER_JSON_LOGS` | `false` | JSON log lines |
//! | `DESIGNER_LOG_SOURCE` | `false` | Include file and line |
//! | `DESIGNER_SERVICE_NAME` | `workflow-designer` | Service name |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};
pub use metrics::{
    gather, register_metrics, CONNECTION_STATE, LOG_BUFFER_ENTRIES, LOG_ENTRIES_DROPPED,
    LOG_ENTRIES_EVICTED, LOG_ENTRIES_RECEIVED, SUBSCRIPTIONS_ACTIVE, VALIDATION_DURATION,
    VALIDATION_REQUESTS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard to hold for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_service() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "workflow-designer");
    }

    #[test]
    fn test_metric_inc_macro() {
        let before = VALIDATION_REQUESTS.with_label_values(&["timeout"]).get();
        metric_inc!(VALIDATION_REQUESTS, &["timeout"]);
        metric_inc!(LOG_ENTRIES_EVICTED);
        assert!(VALIDATION_REQUESTS.with_label_values(&["timeout"]).get() > before);
    }
}
