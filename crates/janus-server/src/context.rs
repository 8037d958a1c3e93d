//! Per-call context types.
//!
//! HTTP handlers receive a [`RequestContext`]; RPC methods receive an
//! [`RpcContext`]. Both are built by the server before the supervised
//! handler runs.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{HeaderMap, Method};
use janus_router::Params;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Header carrying the request id on requests and responses.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A unique identifier for each request, using UUID v7.
///
/// ```
/// use janus_server::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered request id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Reuses a caller-supplied id from the `x-request-id` header when it
    /// parses as a UUID, otherwise generates a fresh one.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map_or_else(Self::new, Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-request state handed to HTTP handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    remote_addr: SocketAddr,
    client_ip: IpAddr,
    method: Method,
    path: String,
    endpoint: Option<Arc<str>>,
    params: Params,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for a request received from `remote_addr`.
    ///
    /// The client IP prefers the first `X-Forwarded-For` entry, then
    /// `X-Real-IP`, then the socket address.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, remote_addr: SocketAddr, headers: &HeaderMap) -> Self {
        Self {
            request_id: RequestId::from_headers(headers),
            remote_addr,
            client_ip: client_ip(headers).unwrap_or_else(|| remote_addr.ip()),
            method,
            path: path.into(),
            endpoint: None,
            params: Params::new(),
            started_at: Instant::now(),
        }
    }

    /// Sets the matched path parameters.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Sets the canonical endpoint name.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Arc<str>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Request id.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Peer socket address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Resolved client IP.
    #[must_use]
    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Canonical endpoint name, once routed.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Path parameters captured by the router.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Shorthand for `params().get(name)`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Time since the request was dispatched.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

/// Per-call state handed to RPC methods.
#[derive(Debug, Clone)]
pub struct RpcContext {
    method: Arc<str>,
    metadata: BTreeMap<String, String>,
    remote_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

impl RpcContext {
    /// Creates a context for one RPC call.
    #[must_use]
    pub fn new(
        method: Arc<str>,
        metadata: BTreeMap<String, String>,
        remote_addr: Option<SocketAddr>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            method,
            metadata,
            remote_addr,
            cancel,
        }
    }

    /// Method name as sent by the caller.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Caller metadata. Transport headers and binary entries are not
    /// included.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Peer socket address, when the transport exposes one.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Token cancelled when the server force-stops in-flight calls.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
