//! Prometheus exporter setup.
//!
//! Janus servers record through the `metrics` facade. Installing the
//! exporter here makes those series scrapeable over HTTP; without it the
//! facade calls are no-ops and only the in-process registry keeps counts.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Latency bucket upper bounds, in milliseconds.
///
/// Four buckets per decade from 1 ms, capped at 1,500,000 ms (25 minutes).
/// Shared by the exporter and the server's in-process histograms.
pub const DURATION_BUCKETS_MS: [f64; 26] = [
    1.0, 2.5, 5.0, 7.5, //
    10.0, 25.0, 50.0, 75.0, //
    100.0, 250.0, 500.0, 750.0, //
    1_000.0, 2_500.0, 5_000.0, 7_500.0, //
    10_000.0, 25_000.0, 50_000.0, 75_000.0, //
    100_000.0, 250_000.0, 500_000.0, 750_000.0, //
    1_000_000.0, 1_500_000.0,
];

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics exporter configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the exporter is installed.
    pub enabled: bool,

    /// Scrape listener address (e.g., "0.0.0.0:9090").
    pub addr: String,

    /// Service name, attached to every series as the `service` label.
    pub service_name: String,

    /// Histogram buckets in milliseconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
            service_name: "janus".to_string(),
            duration_buckets: DURATION_BUCKETS_MS.to_vec(),
        }
    }
}

/// Installs the Prometheus recorder and spawns its scrape listener.
///
/// Must run inside a tokio runtime. A second successful call is rejected by
/// the `metrics` facade and reported as `MetricsInit`.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| TelemetryError::MetricsInit(format!("no tokio runtime: {e}")))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .set_buckets(&config.duration_buckets)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    runtime.spawn(async move {
        if let Err(e) = exporter.await {
            tracing::warn!(error = ?e, "prometheus exporter stopped");
        }
    });

    metrics::describe_counter!("panic", "Recovered panics across all endpoints");
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

/// Renders the current metrics in Prometheus text format.
///
/// Returns `None` until [`init_metrics`] has succeeded.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}
