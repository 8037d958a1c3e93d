//! The RPC server, served over gRPC by tonic.
//!
//! Every registered method answers at `/janus.Rpc/{Method}` and moves raw
//! message bytes through [`RawCodec`]. tonic owns framing, HTTP/2 stream
//! limits, gzip and message size limits; the dispatcher looks the method up,
//! tracks the call as in-flight activity and runs it behind the supervisor
//! with the method's metrics record.
//!
//! Stopping closes the listener and lets in-flight calls finish for up to
//! the drain timeout, then cancels whatever is left.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{header, HeaderName, HeaderValue};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::body::BoxBody;
use tonic::codec::CompressionEncoding;
use tonic::codegen::{empty_body, Body, BoxFuture, EnabledCompressionEncodings, Service, StdError};
use tonic::metadata::{KeyAndValueRef, MetadataMap};
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::service::interceptor::InterceptedService;
use tonic::transport::Server as GrpcServer;
use tonic::{Code, Request, Status};

use super::codec::RawCodec;
use super::method::{InterceptorChain, RpcInterceptor, RpcMethod};
use super::status_line;
use crate::access_log::AccessLog;
use crate::activity::ActivityMonitor;
use crate::context::RpcContext;
use crate::metrics::EndpointMetrics;
use crate::supervise::{RpcAdapter, Supervisor};

/// gRPC service name every method is served under.
pub const SERVICE_NAME: &str = "janus.Rpc";

/// Grace period for cancelled calls to flush their responses.
const FORCE_GRACE: Duration = Duration::from_secs(1);

/// A method installed in the dispatch table together with its metrics record.
#[derive(Clone)]
pub(crate) struct MethodEntry {
    pub(crate) method: RpcMethod,
    pub(crate) metrics: Arc<EndpointMetrics>,
}

/// Method name to installed method.
pub(crate) type MethodTable = HashMap<Arc<str>, MethodEntry>;

/// Tunables for the RPC server.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Concurrent calls allowed per connection; `None` is unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// Largest accepted or sent message, after decompression, in bytes.
    pub max_message_bytes: usize,
    /// Gzip-compress responses for callers that accept it.
    pub compression: bool,
    /// How long `stop` waits for in-flight calls before cancelling them.
    pub drain_timeout: Duration,
}

pub(crate) struct RpcShared {
    pub(crate) methods: MethodTable,
    pub(crate) interceptors: Vec<RpcInterceptor>,
    pub(crate) supervisor: Supervisor,
    pub(crate) activity: ActivityMonitor,
    pub(crate) access_log: Option<Arc<AccessLog>>,
    pub(crate) config: RpcServerConfig,
}

/// A running RPC server.
pub struct RpcServer {
    local_addr: SocketAddr,
    drain_timeout: Duration,
    shutdown: CancellationToken,
    force: CancellationToken,
    calls: TaskTracker,
    task: JoinHandle<()>,
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("local_addr", &self.local_addr)
            .field("in_flight", &self.calls.len())
            .finish_non_exhaustive()
    }
}

impl RpcServer {
    /// Starts serving on an already bound listener.
    pub(crate) fn spawn(listener: TcpListener, local_addr: SocketAddr, mut shared: RpcShared) -> Self {
        let shutdown = CancellationToken::new();
        let force = CancellationToken::new();
        let calls = TaskTracker::new();
        let drain_timeout = shared.config.drain_timeout;
        let max_streams = shared.config.max_concurrent_streams;

        let interceptors = InterceptorChain::new(std::mem::take(&mut shared.interceptors));
        let dispatcher = Dispatcher {
            shared: Arc::new(shared),
            force: force.clone(),
            calls: calls.clone(),
        };

        let mut builder = GrpcServer::builder().max_concurrent_streams(max_streams);
        if let Some(limit) = max_streams {
            builder = builder.concurrency_limit_per_connection(limit as usize);
        }
        let router = builder.add_service(InterceptedService::new(dispatcher, interceptors));

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let incoming = TcpListenerStream::new(listener);
            let stopped = async move { signal.cancelled().await };
            if let Err(e) = router.serve_with_incoming_shutdown(incoming, stopped).await {
                tracing::error!(error = %e, "rpc server failed");
            }
            tracing::debug!("rpc listener closed");
        });

        tracing::info!(addr = %local_addr, service = SERVICE_NAME, "rpc server listening");
        Self {
            local_addr,
            drain_timeout,
            shutdown,
            force,
            calls,
            task,
        }
    }

    /// Bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the server and drains in-flight calls.
    ///
    /// Returns `true` if every call finished within the drain timeout and
    /// `false` if remaining calls had to be cancelled.
    pub async fn stop(self) -> bool {
        let Self {
            drain_timeout,
            shutdown,
            force,
            calls,
            mut task,
            ..
        } = self;

        shutdown.cancel();
        calls.close();

        // Calls first: the task only finishes once their responses are flushed.
        let drained = async {
            calls.wait().await;
            if let Err(e) = (&mut task).await {
                tracing::warn!(error = %e, "rpc server task failed");
            }
        };
        if tokio::time::timeout(drain_timeout, drained).await.is_ok() {
            tracing::info!("rpc server drained");
            return true;
        }

        tracing::warn!(in_flight = calls.len(), "rpc drain timed out, cancelling in-flight calls");
        force.cancel();
        let flushed = async {
            calls.wait().await;
            let _ = (&mut task).await;
        };
        if tokio::time::timeout(FORCE_GRACE, flushed).await.is_err() {
            tracing::warn!(in_flight = calls.len(), "rpc connections still open after cancel, aborting");
            task.abort();
        }
        false
    }
}

/// Routes `/janus.Rpc/{Method}` to the installed method.
#[derive(Clone)]
struct Dispatcher {
    shared: Arc<RpcShared>,
    force: CancellationToken,
    calls: TaskTracker,
}

impl NamedService for Dispatcher {
    const NAME: &'static str = SERVICE_NAME;
}

impl<B> Service<http::Request<B>> for Dispatcher
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let entry = method_name(req.uri().path()).and_then(|name| self.shared.methods.get(name));
        let Some(entry) = entry.cloned() else {
            let path = req.uri().path().to_string();
            tracing::debug!(path = %path, "unknown rpc method");
            return Box::pin(async move { Ok(unimplemented(&path)) });
        };

        let activity = self.shared.activity.track();
        let call = self.calls.token();
        let config = &self.shared.config;
        let max = Some(config.max_message_bytes);
        let send = if config.compression {
            gzip()
        } else {
            EnabledCompressionEncodings::default()
        };
        let invoke = Invoke {
            shared: Arc::clone(&self.shared),
            force: self.force.clone(),
            entry,
        };

        Box::pin(async move {
            let mut grpc = Grpc::new(RawCodec)
                .apply_compression_config(gzip(), send)
                .apply_max_message_size_config(max, max);
            let response = grpc.unary(invoke, req).await;
            drop(call);
            drop(activity);
            Ok(response)
        })
    }
}

fn gzip() -> EnabledCompressionEncodings {
    let mut encodings = EnabledCompressionEncodings::default();
    encodings.enable(CompressionEncoding::Gzip);
    encodings
}

fn method_name(path: &str) -> Option<&str> {
    path.strip_prefix('/')?
        .strip_prefix(SERVICE_NAME)?
        .strip_prefix('/')
        .filter(|name| !name.is_empty() && !name.contains('/'))
}

fn unimplemented(path: &str) -> http::Response<BoxBody> {
    let mut response = http::Response::new(empty_body());
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("grpc-status"),
        HeaderValue::from(Code::Unimplemented as i32),
    );
    if let Ok(message) = HeaderValue::from_str(&format!("unknown method {path}")) {
        headers.insert(HeaderName::from_static("grpc-message"), message);
    }
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    response
}

/// One call of one method, handed to tonic once the message is decoded.
struct Invoke {
    shared: Arc<RpcShared>,
    force: CancellationToken,
    entry: MethodEntry,
}

impl UnaryService<Bytes> for Invoke {
    type Response = Bytes;
    type Future = BoxFuture<tonic::Response<Bytes>, Status>;

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let shared = Arc::clone(&self.shared);
        let force = self.force.clone();
        let entry = self.entry.clone();
        Box::pin(async move {
            shared
                .invoke(&entry, request, &force)
                .await
                .map(tonic::Response::new)
        })
    }
}

impl RpcShared {
    async fn invoke(
        &self,
        entry: &MethodEntry,
        request: Request<Bytes>,
        force: &CancellationToken,
    ) -> Result<Bytes, Status> {
        let started = Instant::now();
        let remote_addr = request.remote_addr();
        let (metadata, _extensions, payload) = request.into_parts();

        let cancel = force.child_token();
        let ctx = RpcContext::new(
            entry.method.shared_name(),
            caller_metadata(&metadata),
            remote_addr,
            cancel.clone(),
        );
        let adapter = RpcAdapter::new(&ctx, self.access_log.as_deref());
        let call = entry.method.call(ctx.clone(), payload);

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let status = Status::cancelled("server shutting down");
                if let Some(log) = &self.access_log {
                    let error = status_line(&status);
                    log.log_rpc(entry.metrics.name(), started.elapsed(), Some(&error), ctx.metadata());
                }
                Err(status)
            }
            result = self.supervisor.run(&adapter, &entry.metrics, call) => result,
        }
    }
}

/// Caller-supplied ASCII metadata, without gRPC transport headers.
fn caller_metadata(metadata: &MetadataMap) -> BTreeMap<String, String> {
    metadata
        .iter()
        .filter_map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => {
                let key = key.as_str();
                if key.starts_with("grpc-") || matches!(key, "te" | "content-type" | "user-agent") {
                    return None;
                }
                let value = value.to_str().ok()?;
                Some((key.to_string(), value.to_string()))
            }
            KeyAndValueRef::Binary(..) => None,
        })
        .collect()
}
