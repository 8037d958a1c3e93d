//! Root configuration type.

use std::net::SocketAddr;
use std::time::Duration;

use janus_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

use crate::{
    AccessLogSection, ConfigError, HealthSection, LogFormat, RpcSection, ServerSection,
    TelemetrySection,
};

/// Complete Janus server configuration.
///
/// ```
/// use janus_config::JanusConfig;
///
/// let config = JanusConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.health.path, "/status.txt");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct JanusConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerSection,

    /// gRPC settings.
    #[serde(default)]
    pub rpc: RpcSection,

    /// Health check settings.
    #[serde(default)]
    pub health: HealthSection,

    /// Access log files.
    #[serde(default)]
    pub access_log: AccessLogSection,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl JanusConfig {
    /// Local development preset: loopback listeners, pretty debug logs, no
    /// withdraw delay, no exporter.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.http_addr = "127.0.0.1:8080".to_string();
        config.server.rpc_addr = "127.0.0.1:8081".to_string();
        config.health.withdraw_delay_secs = 0;
        config.telemetry.metrics.enabled = false;
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let http = parse_addr("server.http_addr", &self.server.http_addr)?;
        let rpc = parse_addr("server.rpc_addr", &self.server.rpc_addr)?;
        if http.port() != 0 && http == rpc {
            return Err(ConfigError::invalid_value(
                "server.rpc_addr",
                "must differ from server.http_addr",
            ));
        }

        if self.telemetry.metrics.enabled {
            parse_addr("telemetry.metrics.addr", &self.telemetry.metrics.addr)?;
        }

        if !self.health.path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "health.path",
                "must start with '/'",
            ));
        }

        if self.server.max_header_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "server.max_header_bytes",
                "must be greater than zero",
            ));
        }

        if self.rpc.max_message_bytes < 64 {
            return Err(ConfigError::invalid_value(
                "rpc.max_message_bytes",
                "must be at least 64 bytes",
            ));
        }

        Ok(())
    }

    /// Parsed HTTP listener address. Call after [`validate`](Self::validate).
    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server.http_addr", &self.server.http_addr)
    }

    /// Parsed RPC listener address. Call after [`validate`](Self::validate).
    pub fn rpc_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server.rpc_addr", &self.server.rpc_addr)
    }

    /// Read deadline as a [`Duration`].
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.server.read_timeout_ms)
    }

    /// Write deadline as a [`Duration`].
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.server.write_timeout_ms)
    }

    /// Builds the telemetry configuration for `janus-telemetry`.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let logging = &self.telemetry.logging;
        TelemetryConfig::new(
            self.telemetry.service_name.as_str(),
            LogConfig {
                enabled: logging.enabled,
                level: logging.level.clone(),
                json_format: logging.format == LogFormat::Json,
                file_line_info: logging.include_location,
                ..LogConfig::default()
            },
            MetricsConfig {
                enabled: self.telemetry.metrics.enabled,
                addr: self.telemetry.metrics.addr.clone(),
                ..MetricsConfig::default()
            },
        )
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid_value(field, format!("invalid socket address: {value}")))
}
