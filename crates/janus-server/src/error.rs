//! Server and registration errors.

use std::io;

use janus_router::RouteError;
use thiserror::Error;

use crate::access_log::AccessLogError;

/// Errors from starting, running or stopping a [`Server`](crate::Server).
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configured address could not be resolved.
    #[error("invalid {protocol} address '{addr}'")]
    InvalidAddress {
        /// `"http"` or `"rpc"`.
        protocol: &'static str,
        /// The configured address.
        addr: String,
    },

    /// A listener could not be bound.
    #[error("failed to bind {protocol} listener on {addr}: {source}")]
    Bind {
        /// `"http"` or `"rpc"`.
        protocol: &'static str,
        /// The configured address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An access log file could not be opened.
    #[error(transparent)]
    AccessLog(#[from] AccessLogError),

    /// The health-check path collided with a registered route.
    #[error("failed to install health check: {0}")]
    Route(#[from] RouteError),

    /// `start` was called more than once.
    #[error("server already started")]
    AlreadyStarted,

    /// `stop` was called on a server that is not running.
    #[error("server is not running")]
    NotRunning,

    /// In-flight HTTP requests outlived the shutdown timeout.
    #[error("shutdown timed out with {pending} http tasks still running")]
    ShutdownTimeout {
        /// Tasks still running at the deadline.
        pending: usize,
    },

    /// Any other runtime failure.
    #[error("server error: {0}")]
    Shutdown(String),
}

/// Errors from [`Server::register`](crate::Server::register).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// Two operations map to the same canonical endpoint name.
    #[error("duplicate endpoint '{name}'")]
    DuplicateEndpoint {
        /// The canonical name.
        name: String,
    },

    /// The router rejected an endpoint's path.
    #[error("cannot route endpoint '{endpoint}': {source}")]
    InvalidRoute {
        /// The canonical name.
        endpoint: String,
        /// Router error.
        #[source]
        source: RouteError,
    },

    /// An RPC method was declared without a name.
    #[error("rpc method name must not be empty")]
    EmptyMethodName,

    /// Services can only be registered before `start`.
    #[error("cannot register services after the server has started")]
    AlreadyStarted,
}

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
