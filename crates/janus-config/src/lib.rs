//! Typed configuration for Janus servers.
//!
//! Configuration is layered, later layers winning:
//! 1. Built-in defaults
//! 2. A TOML or JSON file (format chosen by extension)
//! 3. Environment variables `PREFIX__SECTION__KEY`
//!
//! Unknown keys in files are rejected.
//!
//! # Example
//!
//! ```no_run
//! use janus_config::ConfigLoader;
//!
//! # fn main() -> Result<(), janus_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("janus.toml")?
//!     .with_env_prefix("JANUS")
//!     .load()?;
//!
//! println!("HTTP on {}, RPC on {}", config.server.http_addr, config.server.rpc_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! rpc_addr = "0.0.0.0:8081"
//! read_timeout_ms = 10000
//! write_timeout_ms = 10000
//! shutdown_timeout_secs = 30
//!
//! [rpc]
//! max_concurrent_streams = 100
//! compression = true
//!
//! [health]
//! kind = "draining"
//! path = "/status.txt"
//! withdraw_delay_secs = 5
//!
//! [access_log]
//! http_path = "/var/log/widgets/access.log"
//! rpc_path = "/var/log/widgets/rpc-access.log"
//!
//! [telemetry]
//! service_name = "widgets"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Overrides
//!
//! - `JANUS__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `JANUS__RPC__MAX_CONCURRENT_STREAMS=64`
//! - `JANUS__HEALTH__KIND=simple`
//! - `JANUS__TELEMETRY__LOGGING__LEVEL=debug`

mod config;
mod error;
mod loader;
mod schema;

pub use config::JanusConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    AccessLogSection, HealthCheckKind, HealthSection, LogFormat, LoggingSection, MetricsSection,
    RpcSection, ServerSection, TelemetrySection,
};
