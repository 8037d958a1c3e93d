//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and either
//! a JSON formatter (production) or a pretty formatter (development).
//! `RUST_LOG`, when set, takes precedence over the configured level.
//!
//! ```rust,ignore
//! use janus_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(endpoint = "rpc.GetWidget", "serving");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Default filter directive (e.g., "info", "janus_server=debug").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include thread IDs.
    pub thread_ids: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Service name, attached to the startup log line.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable output at debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            file_line_info: true,
            thread_ids: false,
            include_target: true,
            service_name: "janus".to_string(),
        }
    }

    /// JSON output at info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
            service_name: "janus".to_string(),
        }
    }
}

/// Initializes the global logging subscriber.
///
/// Returns `TelemetryError::LoggingInit` for an invalid filter or when a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => create_env_filter(&config.level)?,
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_thread_ids(config.thread_ids)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_thread_ids(config.thread_ids)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::debug!(service = %config.service_name, "logging initialized");
    Ok(())
}

/// Creates an env filter from a directive string.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Field names used in request logs.
pub mod fields {
    /// Request ID field name.
    pub const REQUEST_ID: &str = "request_id";

    /// Canonical endpoint name field name.
    pub const ENDPOINT: &str = "endpoint";

    /// HTTP method field name.
    pub const HTTP_METHOD: &str = "http.method";

    /// HTTP path field name.
    pub const HTTP_PATH: &str = "http.path";

    /// HTTP status code field name.
    pub const HTTP_STATUS: &str = "http.status_code";

    /// Client address field name.
    pub const REMOTE_ADDR: &str = "remote_addr";

    /// Duration field name (in milliseconds).
    pub const DURATION_MS: &str = "duration_ms";

    /// Error field name.
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_production() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert!(config.json_format);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert!(!config.json_format);
        assert!(config.file_line_info);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info,janus_server=debug").is_ok());
        assert!(matches!(
            create_env_filter("janus_server=notalevel"),
            Err(TelemetryError::LoggingInit(_))
        ));
    }

    #[test]
    fn test_disabled_logging() {
        let config = LogConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
