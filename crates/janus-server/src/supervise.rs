//! The request supervisor shared by both protocols.
//!
//! [`Supervisor::run`] wraps one handler invocation: it starts a
//! [`CallScope`], polls the handler inside a panic boundary, classifies the
//! result through a [`ProtocolAdapter`] and records latency and outcome on the
//! endpoint's metrics record. Adapters decide what a failure looks like on
//! their protocol and what extra instrumentation they emit.
//!
//! The scope lives outside the panic boundary, so a handler that catches its
//! own panics and one that lets them unwind are both counted exactly once.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::FutureExt;
use http::{header, Method, Response, StatusCode};
use http_body_util::Full;

use crate::access_log::AccessLog;
use crate::context::{RequestContext, RequestId, RpcContext};
use crate::endpoint::HttpResponse;
use crate::metrics::{EndpointMetrics, MetricsRegistry, Outcome};
use crate::panic::{Capture, PanicReport};
use crate::rpc::{status_line, Status};

/// Body written for every recovered HTTP panic.
pub const PANIC_BODY: &str = r#"{"error":"internal server error"}"#;

/// Message of the status returned for every recovered RPC panic.
pub const PANIC_STATUS_MESSAGE: &str = "internal error";

/// Protocol-specific half of supervision.
pub trait ProtocolAdapter: Send + Sync {
    /// What the supervised handler produces.
    type Output: Send;

    /// Classifies a handler result.
    fn classify(&self, output: &Self::Output) -> Outcome;

    /// The result substituted for a handler that panicked.
    fn panic_output(&self) -> Self::Output;

    /// Logs a recovered panic with the adapter's request context.
    fn log_panic(&self, metrics: &EndpointMetrics, report: &PanicReport);

    /// Extra instrumentation once the final result is known.
    fn record(&self, _metrics: &EndpointMetrics, _output: &Self::Output, _elapsed: Duration) {}
}

/// Latency and outcome bookkeeping for one call.
///
/// Dropping the scope without [`finish`](Self::finish) records an error,
/// which is what happens when a call is cancelled mid-flight.
#[derive(Debug)]
pub struct CallScope {
    metrics: Arc<EndpointMetrics>,
    started: Instant,
    finished: bool,
}

impl CallScope {
    /// Starts timing a call.
    #[must_use]
    pub fn enter(metrics: &Arc<EndpointMetrics>) -> Self {
        Self {
            metrics: Arc::clone(metrics),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Time since the scope was entered.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records the outcome and the elapsed time.
    pub fn finish(mut self, outcome: Outcome) {
        self.finished = true;
        self.metrics.observe(outcome, self.elapsed());
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(endpoint = self.metrics.name(), "call abandoned before completion");
            self.metrics.observe(Outcome::Error, self.elapsed());
        }
    }
}

/// Runs handlers behind a panic boundary and records their outcome.
#[derive(Debug, Clone)]
pub struct Supervisor {
    registry: Arc<MetricsRegistry>,
}

impl Supervisor {
    /// Creates a supervisor reporting server-wide panics to `registry`.
    #[must_use]
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this supervisor reports to.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Runs `call` for the endpoint described by `metrics`.
    ///
    /// A panic inside `call` is recovered, counted on both the endpoint and
    /// the server-wide panic counter, logged, and replaced by the adapter's
    /// panic output.
    pub async fn run<A, F>(&self, adapter: &A, metrics: &Arc<EndpointMetrics>, call: F) -> A::Output
    where
        A: ProtocolAdapter,
        F: Future<Output = A::Output> + Send,
    {
        let scope = CallScope::enter(metrics);

        match AssertUnwindSafe(Capture::new(call)).catch_unwind().await {
            Ok(output) => {
                let outcome = adapter.classify(&output);
                adapter.record(metrics, &output, scope.elapsed());
                scope.finish(outcome);
                output
            }
            Err(payload) => {
                let report = PanicReport::from_payload(payload.as_ref());
                self.registry.record_panic();
                adapter.log_panic(metrics, &report);

                let output = adapter.panic_output();
                adapter.record(metrics, &output, scope.elapsed());
                scope.finish(Outcome::Panic);
                output
            }
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Adapter for HTTP handlers: 5xx responses are errors and panics become a
/// fixed 500 response.
#[derive(Debug, Clone)]
pub struct HttpAdapter {
    request_id: RequestId,
    method: Method,
    path: String,
    remote_addr: std::net::SocketAddr,
}

impl HttpAdapter {
    /// Captures the parts of `ctx` needed for panic logs.
    #[must_use]
    pub fn new(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id(),
            method: ctx.method().clone(),
            path: ctx.path().to_string(),
            remote_addr: ctx.remote_addr(),
        }
    }
}

/// The response written for a recovered HTTP panic.
#[must_use]
pub fn panic_response() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(PANIC_BODY.as_bytes())));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

impl ProtocolAdapter for HttpAdapter {
    type Output = HttpResponse;

    fn classify(&self, output: &HttpResponse) -> Outcome {
        if output.status().is_server_error() {
            Outcome::Error
        } else {
            Outcome::Success
        }
    }

    fn panic_output(&self) -> HttpResponse {
        panic_response()
    }

    fn log_panic(&self, metrics: &EndpointMetrics, report: &PanicReport) {
        tracing::error!(
            endpoint = metrics.name(),
            request_id = %self.request_id,
            method = %self.method,
            path = %self.path,
            remote_addr = %self.remote_addr,
            panic = %report.message,
            location = report.location.as_deref().unwrap_or("unknown"),
            backtrace = report.backtrace.as_deref().unwrap_or(""),
            "recovered panic in http handler"
        );
    }

    fn record(&self, metrics: &EndpointMetrics, output: &HttpResponse, _elapsed: Duration) {
        metrics.observe_status(output.status());
    }
}

// ============================================================================
// RPC
// ============================================================================

/// Adapter for RPC methods: an `Err` is an error, panics become `Internal`,
/// and every call is written to the RPC access log when one is configured.
#[derive(Debug)]
pub struct RpcAdapter<'a> {
    ctx: &'a RpcContext,
    access_log: Option<&'a AccessLog>,
}

impl<'a> RpcAdapter<'a> {
    /// Creates an adapter for the call described by `ctx`.
    #[must_use]
    pub fn new(ctx: &'a RpcContext, access_log: Option<&'a AccessLog>) -> Self {
        Self { ctx, access_log }
    }
}

impl ProtocolAdapter for RpcAdapter<'_> {
    type Output = Result<Bytes, Status>;

    fn classify(&self, output: &Self::Output) -> Outcome {
        if output.is_ok() {
            Outcome::Success
        } else {
            Outcome::Error
        }
    }

    fn panic_output(&self) -> Self::Output {
        Err(Status::internal(PANIC_STATUS_MESSAGE))
    }

    fn log_panic(&self, metrics: &EndpointMetrics, report: &PanicReport) {
        tracing::error!(
            endpoint = metrics.name(),
            method = self.ctx.method(),
            remote_addr = ?self.ctx.remote_addr(),
            metadata = ?self.ctx.metadata(),
            panic = %report.message,
            location = report.location.as_deref().unwrap_or("unknown"),
            backtrace = report.backtrace.as_deref().unwrap_or(""),
            "recovered panic in rpc method"
        );
    }

    fn record(&self, metrics: &EndpointMetrics, output: &Self::Output, elapsed: Duration) {
        if let Some(log) = self.access_log {
            let error = output.as_ref().err().map(status_line);
            log.log_rpc(metrics.name(), elapsed, error.as_deref(), self.ctx.metadata());
        }
    }
}
