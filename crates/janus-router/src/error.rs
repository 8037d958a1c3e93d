//! Route installation errors.

use http::Method;
use thiserror::Error;

/// Errors returned when installing a route.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// The method is already installed for this path pattern.
    #[error("route conflict: {method} {path} is already registered")]
    Conflict {
        /// The conflicting method
        method: Method,
        /// The conflicting path pattern
        path: String,
    },

    /// The path pattern is malformed.
    #[error("invalid route path '{path}': {reason}")]
    InvalidPath {
        /// The rejected path pattern
        path: String,
        /// Why it was rejected
        reason: &'static str,
    },
}
