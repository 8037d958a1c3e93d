//! Configuration schema types.

use serde::{Deserialize, Serialize};

/// Listener and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// JSON/HTTP listener address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// gRPC listener address.
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,

    /// Deadline for reading request headers and body, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Deadline for producing a response, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Maximum size of request headers in bytes.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,

    /// How long to wait for in-flight HTTP requests during shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            rpc_addr: default_rpc_addr(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
            max_header_bytes: default_max_header_bytes(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_rpc_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_io_timeout_ms() -> u64 {
    10_000
}

fn default_max_header_bytes() -> usize {
    1 << 20
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// gRPC server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RpcSection {
    /// Per-connection limit on concurrently executing calls. 0 means unlimited.
    #[serde(default)]
    pub max_concurrent_streams: u32,

    /// Largest accepted or sent message, in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Gzip-compress responses for callers that accept them.
    #[serde(default)]
    pub compression: bool,

    /// How long a stopping RPC server waits for in-flight calls.
    #[serde(default = "default_shutdown_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 0,
            max_message_bytes: default_max_message_bytes(),
            compression: false,
            drain_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_max_message_bytes() -> usize {
    4 * 1024 * 1024
}

/// Which health check the server advertises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    /// Always healthy until the process exits.
    Simple,
    /// Reports draining on stop and waits for in-flight requests.
    #[default]
    Draining,
}

/// Health check settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HealthSection {
    /// Health check flavour.
    #[serde(default)]
    pub kind: HealthCheckKind,

    /// Path the load balancer polls.
    #[serde(default = "default_health_path")]
    pub path: String,

    /// Time between reporting "draining" and waiting on in-flight requests.
    #[serde(default = "default_withdraw_delay")]
    pub withdraw_delay_secs: u64,

    /// Upper bound on waiting for in-flight requests once draining.
    #[serde(default = "default_shutdown_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::default(),
            path: default_health_path(),
            withdraw_delay_secs: default_withdraw_delay(),
            drain_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_health_path() -> String {
    "/status.txt".to_string()
}

fn default_withdraw_delay() -> u64 {
    5
}

/// Access log destinations. Absent paths disable that log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct AccessLogSection {
    /// Combined-format HTTP access log file.
    #[serde(default)]
    pub http_path: Option<String>,

    /// JSON-lines RPC access log file.
    #[serde(default)]
    pub rpc_path: Option<String>,
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Install the Prometheus exporter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Service name used in logs and metric labels.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Metrics exporter.
    #[serde(default)]
    pub metrics: MetricsSection,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            metrics: MetricsSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

fn default_service_name() -> String {
    "janus".to_string()
}

fn default_true() -> bool {
    true
}
