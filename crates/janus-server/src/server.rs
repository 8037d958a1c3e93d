//! The lifecycle controller.
//!
//! A [`Server`] owns both listeners. Services are registered while it is
//! [`Created`](LifecycleState::Created); [`Server::start`] binds the RPC and
//! HTTP listeners, installs the health check and spawns a control task.
//! [`Server::stop`] hands that task a one-shot acknowledgement and waits for
//! it. The control task then runs, strictly in order:
//!
//! 1. stop the health check (load balancers start withdrawing traffic)
//! 2. stop the RPC server, draining in-flight calls
//! 3. close the HTTP listener and let open connections finish
//!
//! # Example
//!
//! ```rust,ignore
//! use janus_server::{Server, ServerConfig, ServiceDescriptor};
//!
//! let mut server = Server::new(ServerConfig::default());
//! server.register(widgets())?;
//! server.run().await?;
//! ```

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures_util::FutureExt;
use http::{header, HeaderValue, Method, Request, StatusCode};
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use janus_router::{Lookup, Router};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::access_log::{AccessLog, HttpAccessEntry};
use crate::activity::ActivityMonitor;
use crate::config::ServerConfig;
use crate::context::{RequestContext, REQUEST_ID_HEADER};
use crate::endpoint::{error_response, handler_timeout_response, ContextHandler, HttpResponse};
use crate::error::{RegistrationError, ServerError, ServerResult};
use crate::health::HealthCheck;
use crate::metrics::MetricsRegistry;
use crate::panic::panic_message;
use crate::rpc::{RpcServer, RpcShared};
use crate::service::{Registrar, RouteEntry, RpcService};
use crate::shutdown::wait_for_os_signal;
use crate::supervise::{panic_response, Supervisor};

/// Smallest read buffer hyper accepts.
const MIN_HTTP_BUF: usize = 8192;

/// Endpoint name reported for health-check requests.
const HEALTH_ENDPOINT: &str = "health";

/// Where a [`Server`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting registrations; not yet listening.
    Created,
    /// Serving both protocols.
    Started,
    /// Running the shutdown steps.
    Draining,
    /// Both listeners are closed.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

type StopAck = oneshot::Sender<ServerResult<()>>;

struct Running {
    http_addr: SocketAddr,
    rpc_addr: SocketAddr,
    health_path: String,
    stop_tx: mpsc::Sender<StopAck>,
}

/// A dual-protocol server.
pub struct Server {
    config: ServerConfig,
    supervisor: Supervisor,
    activity: ActivityMonitor,
    registrar: Option<Registrar>,
    state: Arc<Mutex<LifecycleState>>,
    running: Option<Running>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("http_addr", &self.http_addr())
            .field("rpc_addr", &self.rpc_addr())
            .field("in_flight", &self.activity.count())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server with its own metrics registry and activity monitor.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let supervisor = Supervisor::new(Arc::new(MetricsRegistry::new()));
        let registrar = Registrar::new(supervisor.clone(), config.write_timeout());
        Self {
            config,
            registrar: Some(registrar),
            supervisor,
            activity: ActivityMonitor::new(),
            state: Arc::new(Mutex::new(LifecycleState::Created)),
            running: None,
        }
    }

    /// The configuration the server was created with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registers a service. Only allowed before [`start`](Self::start).
    pub fn register(&mut self, service: impl RpcService) -> Result<(), RegistrationError> {
        if self.state() != LifecycleState::Created {
            return Err(RegistrationError::AlreadyStarted);
        }
        match self.registrar.as_mut() {
            Some(registrar) => registrar.register(service.describe()),
            None => Err(RegistrationError::AlreadyStarted),
        }
    }

    /// Binds both listeners and starts serving.
    ///
    /// Fails without serving anything if an access log cannot be opened or
    /// either listener cannot be bound.
    pub async fn start(&mut self) -> ServerResult<()> {
        if self.state() != LifecycleState::Created || self.registrar.is_none() {
            return Err(ServerError::AlreadyStarted);
        }

        // The health route goes into a copy; the registrar is only consumed
        // once nothing else can fail.
        let health = self.config.health().build(&self.activity);
        let health_path = health.path().to_string();
        let mut router = match &self.registrar {
            Some(registrar) => registrar.routes().clone(),
            None => return Err(ServerError::AlreadyStarted),
        };
        router.handle(Method::GET, &health_path, health_entry(&health))?;

        let http_log = open_log(self.config.http_access_log())?;
        let rpc_log = open_log(self.config.rpc_access_log())?;

        let (rpc_listener, rpc_addr) = bind("rpc", self.config.rpc_addr()).await?;
        let (http_listener, http_addr) = bind("http", self.config.http_addr()).await?;

        let Some(registrar) = self.registrar.take() else {
            return Err(ServerError::AlreadyStarted);
        };
        let methods = registrar.into_methods();

        let rpc = RpcServer::spawn(
            rpc_listener,
            rpc_addr,
            RpcShared {
                methods,
                interceptors: self.config.rpc_interceptors().to_vec(),
                supervisor: self.supervisor.clone(),
                activity: self.activity.clone(),
                access_log: rpc_log,
                config: self.config.rpc_server_config(),
            },
        );

        let http = Arc::new(HttpShared {
            router,
            health_path: health_path.clone(),
            activity: self.activity.clone(),
            registry: Arc::clone(self.supervisor.registry()),
            not_found: self.config.not_found_handler().cloned(),
            access_log: http_log,
            read_timeout: self.config.read_timeout(),
            write_timeout: self.config.write_timeout(),
            max_buf_size: self.config.max_header_bytes().max(MIN_HTTP_BUF),
        });
        let http_tracker = TaskTracker::new();
        let http_cancel = CancellationToken::new();
        http_tracker.spawn(accept_http(
            http_listener,
            http,
            http_tracker.clone(),
            http_cancel.clone(),
        ));
        tracing::info!(addr = %http_addr, health_path = %health_path, "http server listening");

        let (stop_tx, stop_rx) = mpsc::channel(1);
        tokio::spawn(control(
            stop_rx,
            Shutdown {
                health,
                rpc,
                http_cancel,
                http_tracker,
                http_timeout: self.config.shutdown_timeout(),
                state: Arc::clone(&self.state),
            },
        ));

        *self.state.lock() = LifecycleState::Started;
        self.running = Some(Running {
            http_addr,
            rpc_addr,
            health_path,
            stop_tx,
        });
        Ok(())
    }

    /// Runs the shutdown steps and waits for them to finish.
    ///
    /// Returns [`ServerError::NotRunning`] if the server was never started
    /// or has already stopped.
    pub async fn stop(&self) -> ServerResult<()> {
        let Some(running) = &self.running else {
            return Err(ServerError::NotRunning);
        };
        let (ack, done) = oneshot::channel();
        running
            .stop_tx
            .send(ack)
            .await
            .map_err(|_| ServerError::NotRunning)?;
        done.await.map_err(|_| ServerError::NotRunning)?
    }

    /// Starts the server, waits for SIGINT or SIGTERM, then stops it.
    pub async fn run(&mut self) -> ServerResult<()> {
        self.start().await?;
        if let Err(e) = wait_for_os_signal().await {
            tracing::error!(error = %e, "failed to listen for shutdown signals, stopping");
        }
        self.stop().await
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Bound HTTP address, once started.
    #[must_use]
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.http_addr)
    }

    /// Bound RPC address, once started.
    #[must_use]
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.rpc_addr)
    }

    /// Path the health check is served on, once started.
    #[must_use]
    pub fn health_check_path(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.health_path.as_str())
    }

    /// This server's metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.supervisor.registry()
    }

    /// This server's activity monitor.
    #[must_use]
    pub fn activity(&self) -> &ActivityMonitor {
        &self.activity
    }
}

fn open_log(path: Option<&std::path::Path>) -> ServerResult<Option<Arc<AccessLog>>> {
    match path {
        Some(path) => Ok(Some(Arc::new(AccessLog::open(path)?))),
        None => Ok(None),
    }
}

async fn bind(protocol: &'static str, addr: &str) -> ServerResult<(TcpListener, SocketAddr)> {
    let bind_err = |source| ServerError::Bind {
        protocol,
        addr: addr.to_string(),
        source,
    };
    let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
    let local = listener.local_addr().map_err(bind_err)?;
    Ok((listener, local))
}

fn health_entry(health: &Arc<dyn HealthCheck>) -> RouteEntry {
    let health = Arc::clone(health);
    let handler: ContextHandler = Arc::new(move |_ctx: RequestContext, _req: Request<Bytes>| {
        let response = health.respond();
        Box::pin(async move { response })
    });
    RouteEntry {
        endpoint: HEALTH_ENDPOINT.into(),
        handler,
    }
}

// ============================================================================
// Shutdown control task
// ============================================================================

struct Shutdown {
    health: Arc<dyn HealthCheck>,
    rpc: RpcServer,
    http_cancel: CancellationToken,
    http_tracker: TaskTracker,
    http_timeout: Duration,
    state: Arc<Mutex<LifecycleState>>,
}

async fn control(mut requests: mpsc::Receiver<StopAck>, shutdown: Shutdown) {
    // `None` means the server handle was dropped without stopping.
    let ack = requests.recv().await;
    *shutdown.state.lock() = LifecycleState::Draining;

    tracing::info!("stopping health check");
    if let Err(e) = shutdown.health.stop().await {
        tracing::warn!(error = %e, "health check did not drain cleanly");
    }

    tracing::info!("stopping rpc server");
    if !shutdown.rpc.stop().await {
        tracing::warn!("rpc server stopped with cancelled calls");
    }

    tracing::info!("closing http listener");
    shutdown.http_cancel.cancel();
    shutdown.http_tracker.close();
    let result = match tokio::time::timeout(shutdown.http_timeout, shutdown.http_tracker.wait()).await {
        Ok(()) => Ok(()),
        Err(_) => {
            let pending = shutdown.http_tracker.len();
            tracing::warn!(pending, "http connections still open after shutdown timeout");
            Err(ServerError::ShutdownTimeout { pending })
        }
    };

    *shutdown.state.lock() = LifecycleState::Stopped;
    drop(requests);
    tracing::info!("server stopped");

    if let Some(ack) = ack {
        let _ = ack.send(result);
    }
}

// ============================================================================
// HTTP front end
// ============================================================================

struct HttpShared {
    router: Router<RouteEntry>,
    health_path: String,
    activity: ActivityMonitor,
    registry: Arc<MetricsRegistry>,
    not_found: Option<ContextHandler>,
    access_log: Option<Arc<AccessLog>>,
    read_timeout: Duration,
    write_timeout: Duration,
    max_buf_size: usize,
}

async fn accept_http(
    listener: TcpListener,
    shared: Arc<HttpShared>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    tracker.spawn(serve_http(stream, remote_addr, Arc::clone(&shared), cancel.clone()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept http connection");
                }
            }
        }
    }
    tracing::debug!("http listener closed");
}

async fn serve_http(
    stream: TcpStream,
    remote_addr: SocketAddr,
    shared: Arc<HttpShared>,
    cancel: CancellationToken,
) {
    let io = TokioIo::new(stream);
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(shared.read_timeout)
        .max_buf_size(shared.max_buf_size);

    let service = service_fn(move |req: Request<Incoming>| {
        let shared = Arc::clone(&shared);
        async move { Ok::<_, Infallible>(shared.handle(req, remote_addr).await) }
    });

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(remote_addr = %remote_addr, error = %e, "http connection error");
            }
            return;
        }
        () = cancel.cancelled() => {}
    }

    conn.as_mut().graceful_shutdown();
    if let Err(e) = conn.await {
        tracing::debug!(remote_addr = %remote_addr, error = %e, "http connection error during shutdown");
    }
}

impl HttpShared {
    /// Handles one request: activity tracking, dispatch and access logging.
    async fn handle(&self, req: Request<Incoming>, remote_addr: SocketAddr) -> HttpResponse {
        let started = Instant::now();
        let method = req.method().clone();
        let version = req.version();
        let target = req
            .uri()
            .path_and_query()
            .map_or_else(|| req.uri().path().to_string(), ToString::to_string);
        let referer = header_string(&req, header::REFERER);
        let user_agent = header_string(&req, header::USER_AGENT);

        let ctx = RequestContext::new(method.clone(), req.uri().path(), remote_addr, req.headers());
        let _activity = (ctx.path() != self.health_path).then(|| self.activity.track());
        let request_id = ctx.request_id();
        let client_ip = ctx.client_ip();

        let mut response = self.respond(ctx, req).await;
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        if let Some(log) = &self.access_log {
            let bytes = response
                .body()
                .size_hint()
                .exact()
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0);
            log.log_http(&HttpAccessEntry {
                client_ip,
                time: Utc::now(),
                method: &method,
                target: &target,
                version,
                status: response.status(),
                bytes,
                referer: referer.as_deref(),
                user_agent: user_agent.as_deref(),
                duration: started.elapsed(),
            });
        }
        response
    }

    /// Reads the body and dispatches. Registered endpoints enforce the write
    /// timeout inside their supervision; this boundary catches panics from
    /// routing and the not-found handler.
    async fn respond(&self, ctx: RequestContext, req: Request<Incoming>) -> HttpResponse {
        let (parts, body) = req.into_parts();
        let body = match tokio::time::timeout(self.read_timeout, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => {
                tracing::debug!(request_id = %ctx.request_id(), error = %e, "failed to read request body");
                return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
            }
            Err(_) => {
                tracing::warn!(request_id = %ctx.request_id(), path = ctx.path(), "request body read timed out");
                return error_response(StatusCode::REQUEST_TIMEOUT, "request body read timed out");
            }
        };
        let req = Request::from_parts(parts, body);

        let request_id = ctx.request_id();
        let path = ctx.path().to_string();
        match AssertUnwindSafe(self.dispatch(ctx, req)).catch_unwind().await {
            Ok(response) => response,
            Err(payload) => {
                self.registry.record_panic();
                tracing::error!(
                    request_id = %request_id,
                    path = %path,
                    panic = %panic_message(payload.as_ref()),
                    "recovered panic outside endpoint supervision"
                );
                panic_response()
            }
        }
    }

    async fn dispatch(&self, ctx: RequestContext, req: Request<Bytes>) -> HttpResponse {
        match self.router.lookup(req.method(), ctx.path()) {
            Lookup::Found(found) => {
                let handler = Arc::clone(&found.value.handler);
                let ctx = ctx
                    .with_params(found.params)
                    .with_endpoint(Arc::clone(&found.value.endpoint));
                handler(ctx, req).await
            }
            Lookup::MethodNotAllowed(allow) => {
                let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                response
            }
            Lookup::NotFound => match &self.not_found {
                Some(handler) => {
                    let request_id = ctx.request_id();
                    match tokio::time::timeout(self.write_timeout, handler(ctx, req)).await {
                        Ok(response) => response,
                        Err(_) => {
                            tracing::warn!(request_id = %request_id, "not-found handler timed out");
                            handler_timeout_response()
                        }
                    }
                }
                None => error_response(StatusCode::NOT_FOUND, "not found"),
            },
        }
    }
}

fn header_string<B>(req: &Request<B>, name: header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthConfig;
    use crate::service::ServiceDescriptor;

    fn local_config() -> ServerConfig {
        ServerConfig::builder()
            .http_addr("127.0.0.1:0")
            .rpc_addr("127.0.0.1:0")
            .health(HealthConfig::Simple {
                path: "/status.txt".into(),
            })
            .build()
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Draining.to_string(), "draining");
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let mut server = Server::new(local_config());
        assert_eq!(server.state(), LifecycleState::Created);
        assert!(server.http_addr().is_none());

        server.start().await.unwrap();
        assert_eq!(server.state(), LifecycleState::Started);
        assert_ne!(server.http_addr().unwrap().port(), 0);
        assert_ne!(server.rpc_addr().unwrap().port(), 0);
        assert_eq!(server.health_check_path(), Some("/status.txt"));

        server.stop().await.unwrap();
        assert_eq!(server.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let server = Server::new(local_config());
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let mut server = Server::new(local_config());
        server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_after_start_rejected() {
        let mut server = Server::new(local_config());
        server.start().await.unwrap();
        let err = server.register(ServiceDescriptor::new("/late")).unwrap_err();
        assert_eq!(err, RegistrationError::AlreadyStarted);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_access_log_open_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::builder()
            .http_addr("127.0.0.1:0")
            .rpc_addr("127.0.0.1:0")
            .http_access_log(dir.path().join("missing").join("http.log"))
            .build();
        let mut server = Server::new(config);
        assert!(matches!(server.start().await, Err(ServerError::AccessLog(_))));
        assert_eq!(server.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn test_health_path_conflict() {
        let mut server = Server::new(local_config());
        server
            .register(ServiceDescriptor::new("").context_endpoint(
                Method::GET,
                "/status.txt",
                crate::endpoint::context_handler(|_ctx, _req| async {
                    error_response(StatusCode::OK, "mine")
                }),
            ))
            .unwrap();
        assert!(matches!(server.start().await, Err(ServerError::Route(_))));
        assert!(server.http_addr().is_none());
    }

    #[tokio::test]
    async fn test_health_conflict_keeps_server_usable() {
        let mut server = Server::new(local_config());
        let mine = || {
            ServiceDescriptor::new("").context_endpoint(
                Method::GET,
                "/status.txt",
                crate::endpoint::context_handler(|_ctx, _req| async {
                    error_response(StatusCode::OK, "mine")
                }),
            )
        };
        server.register(mine()).unwrap();

        assert!(matches!(server.start().await, Err(ServerError::Route(_))));
        assert_eq!(server.state(), LifecycleState::Created);

        // Still accepting registrations, and a retry reports the same
        // conflict rather than AlreadyStarted.
        server
            .register(ServiceDescriptor::new("/v2").context_endpoint(
                Method::GET,
                "/ping",
                crate::endpoint::context_handler(|_ctx, _req| async {
                    error_response(StatusCode::OK, "pong")
                }),
            ))
            .unwrap();
        assert!(matches!(server.start().await, Err(ServerError::Route(_))));
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }
}
