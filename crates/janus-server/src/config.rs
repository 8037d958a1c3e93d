//! Server configuration types.
//!
//! # Example
//!
//! ```rust
//! use janus_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("0.0.0.0:8080")
//!     .rpc_addr("0.0.0.0:8081")
//!     .shutdown_timeout(Duration::from_secs(30))
//!     .build();
//!
//! assert_eq!(config.http_addr(), "0.0.0.0:8080");
//! assert_eq!(config.rpc_addr(), "0.0.0.0:8081");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::ContextHandler;
use crate::health::HealthConfig;
use crate::rpc::{RpcInterceptor, RpcServerConfig};

/// Default HTTP bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default RPC bind address.
pub const DEFAULT_RPC_ADDR: &str = "0.0.0.0:8081";

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read deadline in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

/// Default HTTP handler deadline in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Default HTTP header buffer limit.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 20;

/// Default largest RPC message.
pub const DEFAULT_RPC_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Default RPC drain timeout in seconds.
pub const DEFAULT_RPC_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Clone)]
pub struct ServerConfig {
    http_addr: String,
    rpc_addr: String,
    shutdown_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    max_header_bytes: usize,
    rpc_max_concurrent_streams: Option<u32>,
    rpc_max_message_bytes: usize,
    rpc_compression: bool,
    rpc_drain_timeout: Duration,
    rpc_interceptors: Vec<RpcInterceptor>,
    not_found_handler: Option<ContextHandler>,
    http_access_log: Option<PathBuf>,
    rpc_access_log: Option<PathBuf>,
    health: HealthConfig,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// HTTP bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// RPC bind address.
    #[must_use]
    pub fn rpc_addr(&self) -> &str {
        &self.rpc_addr
    }

    /// How long stop waits for in-flight HTTP requests.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Deadline for reading request headers and body.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Deadline for a handler to produce its response.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// HTTP header buffer limit.
    #[must_use]
    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    /// RPC interceptors, in call order.
    #[must_use]
    pub fn rpc_interceptors(&self) -> &[RpcInterceptor] {
        &self.rpc_interceptors
    }

    /// Custom HTTP not-found handler.
    #[must_use]
    pub fn not_found_handler(&self) -> Option<&ContextHandler> {
        self.not_found_handler.as_ref()
    }

    /// HTTP access log path.
    #[must_use]
    pub fn http_access_log(&self) -> Option<&Path> {
        self.http_access_log.as_deref()
    }

    /// RPC access log path.
    #[must_use]
    pub fn rpc_access_log(&self) -> Option<&Path> {
        self.rpc_access_log.as_deref()
    }

    /// Health-check configuration.
    #[must_use]
    pub fn health(&self) -> &HealthConfig {
        &self.health
    }

    /// Settings handed to the RPC server.
    #[must_use]
    pub fn rpc_server_config(&self) -> RpcServerConfig {
        RpcServerConfig {
            max_concurrent_streams: self.rpc_max_concurrent_streams,
            max_message_bytes: self.rpc_max_message_bytes,
            compression: self.rpc_compression,
            drain_timeout: self.rpc_drain_timeout,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("rpc_addr", &self.rpc_addr)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("max_header_bytes", &self.max_header_bytes)
            .field("rpc", &self.rpc_server_config())
            .field("rpc_interceptors", &self.rpc_interceptors.len())
            .field("custom_not_found", &self.not_found_handler.is_some())
            .field("http_access_log", &self.http_access_log)
            .field("rpc_access_log", &self.rpc_access_log)
            .field("health", &self.health)
            .finish()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfigBuilder {
    /// Creates a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig {
                http_addr: DEFAULT_HTTP_ADDR.to_string(),
                rpc_addr: DEFAULT_RPC_ADDR.to_string(),
                shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
                read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
                write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
                max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
                rpc_max_concurrent_streams: None,
                rpc_max_message_bytes: DEFAULT_RPC_MAX_MESSAGE_BYTES,
                rpc_compression: false,
                rpc_drain_timeout: Duration::from_secs(DEFAULT_RPC_DRAIN_TIMEOUT_SECS),
                rpc_interceptors: Vec::new(),
                not_found_handler: None,
                http_access_log: None,
                rpc_access_log: None,
                health: HealthConfig::default(),
            },
        }
    }

    /// Sets the HTTP bind address (e.g. `"0.0.0.0:8080"`, port 0 for any).
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.http_addr = addr.into();
        self
    }

    /// Sets the RPC bind address.
    #[must_use]
    pub fn rpc_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.rpc_addr = addr.into();
        self
    }

    /// Sets how long stop waits for in-flight HTTP requests.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Sets the request read deadline.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets the handler deadline; handlers exceeding it answer `503`.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Sets the HTTP header buffer limit.
    #[must_use]
    pub fn max_header_bytes(mut self, bytes: usize) -> Self {
        self.config.max_header_bytes = bytes;
        self
    }

    /// Limits concurrent calls per RPC connection.
    #[must_use]
    pub fn rpc_max_concurrent_streams(mut self, limit: Option<u32>) -> Self {
        self.config.rpc_max_concurrent_streams = limit;
        self
    }

    /// Sets the largest RPC message accepted or sent.
    #[must_use]
    pub fn rpc_max_message_bytes(mut self, bytes: usize) -> Self {
        self.config.rpc_max_message_bytes = bytes;
        self
    }

    /// Enables gzip compression of RPC responses for callers that accept it.
    #[must_use]
    pub fn rpc_compression(mut self, enabled: bool) -> Self {
        self.config.rpc_compression = enabled;
        self
    }

    /// Sets how long RPC stop waits before cancelling in-flight calls.
    #[must_use]
    pub fn rpc_drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.rpc_drain_timeout = timeout;
        self
    }

    /// Appends an RPC interceptor.
    #[must_use]
    pub fn rpc_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> + Send + Sync + 'static,
    {
        self.config.rpc_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Overrides the default `404` handler.
    #[must_use]
    pub fn not_found_handler(mut self, handler: ContextHandler) -> Self {
        self.config.not_found_handler = Some(handler);
        self
    }

    /// Enables the HTTP access log at `path`.
    #[must_use]
    pub fn http_access_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.http_access_log = Some(path.into());
        self
    }

    /// Enables the RPC access log at `path`.
    #[must_use]
    pub fn rpc_access_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rpc_access_log = Some(path.into());
        self
    }

    /// Selects the health check.
    #[must_use]
    pub fn health(mut self, health: HealthConfig) -> Self {
        self.config.health = health;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr(), DEFAULT_HTTP_ADDR);
        assert_eq!(config.rpc_addr(), DEFAULT_RPC_ADDR);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_header_bytes(), 1 << 20);
        assert!(config.rpc_interceptors().is_empty());
        assert!(config.not_found_handler().is_none());
        assert!(config.http_access_log().is_none());

        let rpc = config.rpc_server_config();
        assert_eq!(rpc.max_concurrent_streams, None);
        assert_eq!(rpc.max_message_bytes, DEFAULT_RPC_MAX_MESSAGE_BYTES);
        assert!(!rpc.compression);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ServerConfig::builder()
            .http_addr("127.0.0.1:0")
            .rpc_addr("127.0.0.1:0")
            .read_timeout(Duration::from_secs(2))
            .write_timeout(Duration::from_secs(3))
            .rpc_max_concurrent_streams(Some(8))
            .rpc_compression(true)
            .rpc_drain_timeout(Duration::from_millis(500))
            .rpc_interceptor(Ok)
            .rpc_access_log("/tmp/rpc.log")
            .health(HealthConfig::Simple {
                path: "/healthz".into(),
            })
            .build();

        assert_eq!(config.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.write_timeout(), Duration::from_secs(3));
        assert_eq!(config.rpc_interceptors().len(), 1);
        assert_eq!(config.rpc_access_log(), Some(Path::new("/tmp/rpc.log")));

        let rpc = config.rpc_server_config();
        assert_eq!(rpc.max_concurrent_streams, Some(8));
        assert!(rpc.compression);
        assert_eq!(rpc.drain_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_debug_omits_handlers() {
        let debug = format!("{:?}", ServerConfig::default());
        assert!(debug.contains("http_addr"));
        assert!(debug.contains("custom_not_found: false"));
    }
}
