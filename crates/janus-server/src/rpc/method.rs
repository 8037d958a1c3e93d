//! RPC method descriptors and interceptors.
//!
//! Interceptors run as a tonic [`Interceptor`] in front of method dispatch.
//! A rejected call never reaches the method, so it is not counted on the
//! method's metrics record.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::context::RpcContext;

/// Type-erased RPC method implementation.
pub type RpcHandler =
    Arc<dyn Fn(RpcContext, Bytes) -> BoxFuture<'static, Result<Bytes, Status>> + Send + Sync>;

/// A named RPC method.
///
/// ```rust
/// use janus_server::rpc::{RpcMethod, Status};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize)]
/// struct GetWidget { id: u64 }
///
/// #[derive(Serialize)]
/// struct Widget { id: u64 }
///
/// let method = RpcMethod::json("GetWidget", |_ctx, req: GetWidget| async move {
///     Ok::<_, Status>(Widget { id: req.id })
/// });
/// assert_eq!(method.name(), "GetWidget");
/// ```
#[derive(Clone)]
pub struct RpcMethod {
    name: Arc<str>,
    handler: RpcHandler,
}

impl RpcMethod {
    /// Creates a method operating on raw payload bytes.
    pub fn raw<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(RpcContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, Status>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |ctx, payload| Box::pin(f(ctx, payload))),
        }
    }

    /// Creates a method whose payloads are JSON-encoded.
    ///
    /// An empty payload decodes as JSON `null`. Undecodable input answers
    /// `InvalidArgument`.
    pub fn json<I, O, F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(RpcContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, Status>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self {
            name: name.into(),
            handler: Arc::new(move |ctx, payload| {
                let f = Arc::clone(&f);
                Box::pin(async move {
                    let raw: &[u8] = if payload.is_empty() { &b"null"[..] } else { &payload[..] };
                    let input: I = serde_json::from_slice(raw)
                        .map_err(|e| Status::invalid_argument(format!("invalid request: {e}")))?;
                    let output = f(ctx, input).await?;
                    serde_json::to_vec(&output)
                        .map(Bytes::from)
                        .map_err(|e| Status::internal(format!("failed to encode response: {e}")))
                })
            }),
        }
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Invokes the implementation.
    pub fn call(&self, ctx: RpcContext, payload: Bytes) -> BoxFuture<'static, Result<Bytes, Status>> {
        (self.handler)(ctx, payload)
    }
}

impl fmt::Debug for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMethod").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Pre-call hook run for every RPC method.
///
/// Receives the call's metadata and extensions; returning an error rejects
/// the call with that status before the method is looked up.
pub type RpcInterceptor = Arc<dyn Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync>;

/// Interceptors applied in registration order; the first rejection wins.
#[derive(Clone)]
pub(crate) struct InterceptorChain {
    interceptors: Arc<[RpcInterceptor]>,
}

impl InterceptorChain {
    pub(crate) fn new(interceptors: Vec<RpcInterceptor>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }
}

impl Interceptor for InterceptorChain {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.interceptors
            .iter()
            .try_fold(request, |request, interceptor| interceptor(request))
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
