//! Layered configuration loader.

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, HealthCheckKind, JanusConfig, LogFormat};

/// Loads [`JanusConfig`] from defaults, a file, and the environment.
///
/// ```no_run
/// use janus_config::ConfigLoader;
///
/// # fn main() -> Result<(), janus_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_dotenv()
///     .with_file("janus.toml")?
///     .with_env_prefix("JANUS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: JanusConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: JanusConfig::default(),
            env_prefix: None,
        }
    }

    /// Replace the base layer with the development preset.
    ///
    /// ```
    /// use janus_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = JanusConfig::development();
        self
    }

    /// Load a TOML (`.toml`) or JSON (`.json`) file.
    ///
    /// Sections missing from the file take their default values.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load a file if it exists, otherwise keep the current layer.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format ("toml" or "json").
    ///
    /// ```
    /// use janus_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[server]\nrpc_addr = \"127.0.0.1:9001\"", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.rpc_addr, "127.0.0.1:9001");
    /// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Apply `PREFIX__SECTION__KEY` environment overrides at load time.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Populate the process environment from a `.env` file, if present.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        let _ = dotenvy::dotenv();
        self
    }

    /// Apply environment overrides and validate.
    pub fn load(mut self) -> Result<JanusConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let marker = format!("{prefix}__");
            let vars: Vec<(String, String)> =
                env::vars().filter(|(k, _)| k.starts_with(&marker)).collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    fn parse_file(content: &str, path: &Path) -> Result<JanusConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let rest = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = rest.split("__").collect();
        let c = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "HTTP_ADDR"] => c.server.http_addr = value.to_string(),
            ["SERVER", "RPC_ADDR"] => c.server.rpc_addr = value.to_string(),
            ["SERVER", "READ_TIMEOUT_MS"] => c.server.read_timeout_ms = parse_num(key, value)?,
            ["SERVER", "WRITE_TIMEOUT_MS"] => c.server.write_timeout_ms = parse_num(key, value)?,
            ["SERVER", "MAX_HEADER_BYTES"] => c.server.max_header_bytes = parse_num(key, value)?,
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                c.server.shutdown_timeout_secs = parse_num(key, value)?;
            }

            ["RPC", "MAX_CONCURRENT_STREAMS"] => {
                c.rpc.max_concurrent_streams = parse_num(key, value)?;
            }
            ["RPC", "MAX_MESSAGE_BYTES"] => c.rpc.max_message_bytes = parse_num(key, value)?,
            ["RPC", "COMPRESSION"] => c.rpc.compression = parse_flag(key, value)?,
            ["RPC", "DRAIN_TIMEOUT_SECS"] => c.rpc.drain_timeout_secs = parse_num(key, value)?,

            ["HEALTH", "KIND"] => {
                c.health.kind = match value.to_lowercase().as_str() {
                    "simple" => HealthCheckKind::Simple,
                    "draining" => HealthCheckKind::Draining,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'simple' or 'draining'",
                        ))
                    }
                };
            }
            ["HEALTH", "PATH"] => c.health.path = value.to_string(),
            ["HEALTH", "WITHDRAW_DELAY_SECS"] => {
                c.health.withdraw_delay_secs = parse_num(key, value)?;
            }
            ["HEALTH", "DRAIN_TIMEOUT_SECS"] => {
                c.health.drain_timeout_secs = parse_num(key, value)?;
            }

            ["ACCESS_LOG", "HTTP_PATH"] => c.access_log.http_path = non_empty(value),
            ["ACCESS_LOG", "RPC_PATH"] => c.access_log.rpc_path = non_empty(value),

            ["TELEMETRY", "SERVICE_NAME"] => c.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                c.telemetry.metrics.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => c.telemetry.metrics.addr = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                c.telemetry.logging.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => c.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                c.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }

            // Unknown keys are left for other consumers of the prefix.
            _ => {}
        }

        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.server.http_addr, "0.0.0.0:8080");
        assert_eq!(config.health.kind, HealthCheckKind::Draining);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"rpc": {"max_concurrent_streams": 8}, "access_log": {"rpc_path": "/tmp/rpc.log"}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.rpc.max_concurrent_streams, 8);
        assert_eq!(config.access_log.rpc_path.as_deref(), Some("/tmp/rpc.log"));
        assert_eq!(config.access_log.http_path, None);
    }

    #[test]
    fn test_loader_with_string_unknown_format() {
        let result = ConfigLoader::new().with_string("", "yaml");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_loader_rejects_unknown_section() {
        let result = ConfigLoader::new().with_string("[grpc]\nport = 1", "toml");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("janus.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[health]\nkind = \"simple\"\npath = \"/healthz\"").unwrap();

        let config = ConfigLoader::new().with_file(&path).unwrap().load().unwrap();
        assert_eq!(config.health.kind, HealthCheckKind::Simple);
        assert_eq!(config.health.path, "/healthz");
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/janus.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/janus.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config, JanusConfig::default());
    }

    #[test]
    fn test_loader_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("janus.ini");
        fs::write(&path, "x=1").unwrap();
        assert!(matches!(
            ConfigLoader::new().with_file(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    // Env overrides are exercised through apply_env_var directly: mutating
    // the process environment would race with other tests.

    #[test]
    fn test_apply_env_var_addresses() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__SERVER__RPC_ADDR", "127.0.0.1:7001", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__SERVER__READ_TIMEOUT_MS", "250", "TEST")
            .unwrap();
        assert_eq!(loader.config.server.rpc_addr, "127.0.0.1:7001");
        assert_eq!(loader.config.server.read_timeout_ms, 250);
    }

    #[test]
    fn test_apply_env_var_rpc_and_health() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__RPC__COMPRESSION", "yes", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__HEALTH__KIND", "SIMPLE", "TEST")
            .unwrap();
        assert!(loader.config.rpc.compression);
        assert_eq!(loader.config.health.kind, HealthCheckKind::Simple);
    }

    #[test]
    fn test_apply_env_var_access_log_empty_disables() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__ACCESS_LOG__HTTP_PATH", "/var/log/a.log", "TEST")
            .unwrap();
        assert!(loader.config.access_log.http_path.is_some());
        loader
            .apply_env_var("TEST__ACCESS_LOG__HTTP_PATH", "", "TEST")
            .unwrap();
        assert!(loader.config.access_log.http_path.is_none());
    }

    #[test]
    fn test_apply_env_var_invalid_values() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .apply_env_var("TEST__RPC__MAX_CONCURRENT_STREAMS", "lots", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__TELEMETRY__LOGGING__FORMAT", "xml", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__HEALTH__KIND", "eventually", "TEST")
            .is_err());
    }

    #[test]
    fn test_apply_env_var_unknown_key_ignored() {
        let mut loader = ConfigLoader::new();
        assert!(loader.apply_env_var("TEST__NOPE__X", "1", "TEST").is_ok());
    }
}
