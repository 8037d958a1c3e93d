//! Maps the file/env configuration onto the server runtime's settings.

use std::time::Duration;

use janus_config::{HealthCheckKind, JanusConfig};
use janus_server::{HealthConfig, ServerConfig};

/// Builds the runtime configuration from a validated [`JanusConfig`].
pub fn server_config(config: &JanusConfig) -> ServerConfig {
    let health = match config.health.kind {
        HealthCheckKind::Simple => HealthConfig::Simple {
            path: config.health.path.clone(),
        },
        HealthCheckKind::Draining => HealthConfig::Draining {
            path: config.health.path.clone(),
            withdraw_delay: Duration::from_secs(config.health.withdraw_delay_secs),
            drain_timeout: Duration::from_secs(config.health.drain_timeout_secs),
        },
    };

    // 0 means no per-connection limit.
    let streams = match config.rpc.max_concurrent_streams {
        0 => None,
        n => Some(n),
    };

    let mut builder = ServerConfig::builder()
        .http_addr(config.server.http_addr.clone())
        .rpc_addr(config.server.rpc_addr.clone())
        .read_timeout(config.read_timeout())
        .write_timeout(config.write_timeout())
        .max_header_bytes(config.server.max_header_bytes)
        .shutdown_timeout(Duration::from_secs(config.server.shutdown_timeout_secs))
        .rpc_max_concurrent_streams(streams)
        .rpc_max_message_bytes(config.rpc.max_message_bytes)
        .rpc_compression(config.rpc.compression)
        .rpc_drain_timeout(Duration::from_secs(config.rpc.drain_timeout_secs))
        .health(health);

    if let Some(path) = &config.access_log.http_path {
        builder = builder.http_access_log(path);
    }
    if let Some(path) = &config.access_log.rpc_path {
        builder = builder.rpc_access_log(path);
    }

    builder.build()
}
