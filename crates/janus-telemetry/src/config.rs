//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Logging and metrics settings for one service.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name, stamped on every log line and metric.
    pub service_name: String,

    /// Metrics exporter settings.
    pub metrics: MetricsConfig,

    /// Log output settings.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Combines logging and metrics settings under `service_name`, which
    /// overrides whatever name either part carried.
    #[must_use]
    pub fn new(service_name: impl Into<String>, mut logging: LogConfig, mut metrics: MetricsConfig) -> Self {
        let service_name = service_name.into();
        logging.service_name = service_name.clone();
        metrics.service_name = service_name.clone();
        Self {
            service_name,
            metrics,
            logging,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new("janus", LogConfig::default(), MetricsConfig::default())
    }
}
