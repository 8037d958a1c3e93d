//! Observability setup for Janus services.
//!
//! - **Logging**: structured JSON or pretty logs through `tracing-subscriber`
//! - **Metrics**: a Prometheus scrape endpoint fed by the `metrics` facade
//!
//! The server crate records everything through `tracing` and `metrics`
//! macros; this crate only decides where that output goes.
//!
//! # Example
//!
//! ```rust,ignore
//! use janus_telemetry::{init_telemetry, LogConfig, MetricsConfig, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let metrics = MetricsConfig {
//!         enabled: true,
//!         addr: "0.0.0.0:9090".to_string(),
//!         ..MetricsConfig::default()
//!     };
//!     let config = TelemetryConfig::new("widgets", LogConfig::default(), metrics);
//!
//!     init_telemetry(&config).expect("telemetry");
//! }
//! ```
//!
//! # Exported names
//!
//! Endpoint metrics keep their dotted names (`/v1/widgets/{id}.GET.DURATION`,
//! `rpc.GetWidget.SUCCESS`); the Prometheus exporter sanitizes them into
//! valid series names on render.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig, DURATION_BUCKETS_MS};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// Metrics initialization spawns the exporter on the current tokio runtime,
/// so this must be called from within one when metrics are enabled.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_telemetry_disabled_is_noop() {
        let mut config = TelemetryConfig::default();
        config.logging.enabled = false;
        config.metrics.enabled = false;

        assert!(init_telemetry(&config).is_ok());
    }
}
