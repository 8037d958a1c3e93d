//! Service descriptors and the registrar that installs them.
//!
//! A [`ServiceDescriptor`] bundles RPC methods and HTTP endpoints under one
//! prefix. Registration validates the whole descriptor first and only then
//! creates metrics records and installs supervised handlers, so a rejected
//! descriptor leaves the server untouched.
//!
//! # Canonical names
//!
//! | Operation | Name |
//! |-----------|------|
//! | RPC method `GetWidget` | `rpc.GetWidget` |
//! | `GET /widgets/{id}` under prefix `/v1/` | `/v1/widgets/{id}.GET` |

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request};
use janus_router::Router;

use crate::context::RequestContext;
use crate::endpoint::{
    handler_timeout_response, json_to_http, ContextHandler, JsonHandler, JsonMiddleware, Middleware,
};
use crate::error::RegistrationError;
use crate::metrics::{EndpointKind, EndpointMetrics, MetricsRegistry};
use crate::rpc::{MethodEntry, MethodTable, RpcMethod};
use crate::supervise::{HttpAdapter, Supervisor};

/// Prefix of every RPC canonical name.
pub const RPC_NAME_PREFIX: &str = "rpc.";

/// Canonical name of an RPC method.
#[must_use]
pub fn rpc_endpoint_name(method: &str) -> String {
    format!("{RPC_NAME_PREFIX}{method}")
}

/// Canonical name of an HTTP endpoint. A trailing slash on `prefix` is
/// dropped.
#[must_use]
pub fn http_endpoint_name(prefix: &str, path: &str, method: &Method) -> String {
    format!("{}{path}.{method}", prefix.trim_end_matches('/'))
}

#[derive(Clone)]
enum EndpointHandler {
    Context(ContextHandler),
    Json(JsonHandler),
}

#[derive(Clone)]
struct EndpointSpec {
    method: Method,
    path: String,
    handler: EndpointHandler,
}

/// Everything a service exposes, over both protocols.
///
/// ```rust
/// use http::{Method, StatusCode};
/// use janus_server::endpoint::json_handler;
/// use janus_server::rpc::{RpcMethod, Status};
/// use janus_server::ServiceDescriptor;
///
/// let service = ServiceDescriptor::new("/v1")
///     .rpc(RpcMethod::json("Ping", |_ctx, _req: ()| async { Ok::<_, Status>("pong") }))
///     .json_endpoint(
///         Method::GET,
///         "/ping",
///         json_handler(|_ctx, _req: ()| async { Ok((StatusCode::OK, "pong")) }),
///     );
///
/// assert_eq!(service.prefix(), "/v1");
/// assert_eq!(service.endpoint_names(), vec!["rpc.Ping", "/v1/ping.GET"]);
/// ```
#[derive(Clone)]
pub struct ServiceDescriptor {
    prefix: String,
    methods: Vec<RpcMethod>,
    endpoints: Vec<EndpointSpec>,
    middleware: Option<Middleware>,
    context_middleware: Option<Middleware>,
    json_middleware: Option<JsonMiddleware>,
}

impl ServiceDescriptor {
    /// Starts a descriptor whose HTTP paths live under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            methods: Vec::new(),
            endpoints: Vec::new(),
            middleware: None,
            context_middleware: None,
            json_middleware: None,
        }
    }

    /// Adds an RPC method.
    #[must_use]
    pub fn rpc(mut self, method: RpcMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Adds a context endpoint.
    #[must_use]
    pub fn context_endpoint(mut self, method: Method, path: impl Into<String>, handler: ContextHandler) -> Self {
        self.endpoints.push(EndpointSpec {
            method,
            path: path.into(),
            handler: EndpointHandler::Context(handler),
        });
        self
    }

    /// Adds a JSON endpoint.
    #[must_use]
    pub fn json_endpoint(mut self, method: Method, path: impl Into<String>, handler: JsonHandler) -> Self {
        self.endpoints.push(EndpointSpec {
            method,
            path: path.into(),
            handler: EndpointHandler::Json(handler),
        });
        self
    }

    /// Outermost middleware, applied to every HTTP endpoint.
    #[must_use]
    pub fn middleware<F>(mut self, f: F) -> Self
    where
        F: Fn(ContextHandler) -> ContextHandler + Send + Sync + 'static,
    {
        self.middleware = Some(Arc::new(f));
        self
    }

    /// Middleware applied inside [`middleware`](Self::middleware), to every
    /// HTTP endpoint.
    #[must_use]
    pub fn context_middleware<F>(mut self, f: F) -> Self
    where
        F: Fn(ContextHandler) -> ContextHandler + Send + Sync + 'static,
    {
        self.context_middleware = Some(Arc::new(f));
        self
    }

    /// Middleware applied to JSON endpoints only, before JSON encoding.
    #[must_use]
    pub fn json_middleware<F>(mut self, f: F) -> Self
    where
        F: Fn(JsonHandler) -> JsonHandler + Send + Sync + 'static,
    {
        self.json_middleware = Some(Arc::new(f));
        self
    }

    /// The HTTP prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Canonical names of every operation, RPC methods first.
    #[must_use]
    pub fn endpoint_names(&self) -> Vec<String> {
        self.methods
            .iter()
            .map(|m| rpc_endpoint_name(m.name()))
            .chain(
                self.endpoints
                    .iter()
                    .map(|e| http_endpoint_name(&self.prefix, &e.path, &e.method)),
            )
            .collect()
    }

    fn route_path(&self, path: &str) -> String {
        format!("{}{path}", self.prefix.trim_end_matches('/'))
    }

    /// Applies the service middleware chain to an endpoint handler.
    fn compose(&self, handler: &EndpointHandler) -> ContextHandler {
        let inner = match handler {
            EndpointHandler::Context(h) => Arc::clone(h),
            EndpointHandler::Json(h) => {
                let h = match &self.json_middleware {
                    Some(mw) => mw(Arc::clone(h)),
                    None => Arc::clone(h),
                };
                json_to_http(h)
            }
        };
        let inner = match &self.context_middleware {
            Some(mw) => mw(inner),
            None => inner,
        };
        match &self.middleware {
            Some(mw) => mw(inner),
            None => inner,
        }
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("prefix", &self.prefix)
            .field("endpoints", &self.endpoint_names())
            .field("middleware", &self.middleware.is_some())
            .field("context_middleware", &self.context_middleware.is_some())
            .field("json_middleware", &self.json_middleware.is_some())
            .finish()
    }
}

/// A value that can describe itself as a service.
///
/// Registration only accepts implementors, so a value that is not a
/// service is rejected at compile time.
pub trait RpcService {
    /// Produces the descriptor consumed by registration.
    fn describe(self) -> ServiceDescriptor;
}

impl RpcService for ServiceDescriptor {
    fn describe(self) -> ServiceDescriptor {
        self
    }
}

/// A supervised HTTP handler installed in the router.
#[derive(Clone)]
pub(crate) struct RouteEntry {
    pub(crate) endpoint: Arc<str>,
    pub(crate) handler: ContextHandler,
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Builds both dispatch tables from service descriptors.
pub(crate) struct Registrar {
    supervisor: Supervisor,
    write_timeout: Duration,
    router: Router<RouteEntry>,
    methods: MethodTable,
}

impl Registrar {
    /// `write_timeout` bounds every HTTP handler installed by this registrar.
    pub(crate) fn new(supervisor: Supervisor, write_timeout: Duration) -> Self {
        Self {
            supervisor,
            write_timeout,
            router: Router::new(),
            methods: MethodTable::new(),
        }
    }

    fn registry(&self) -> &Arc<MetricsRegistry> {
        self.supervisor.registry()
    }

    /// Validates and installs every operation of `service`.
    pub(crate) fn register(&mut self, service: ServiceDescriptor) -> Result<(), RegistrationError> {
        if service.methods.iter().any(|m| m.name().is_empty()) {
            return Err(RegistrationError::EmptyMethodName);
        }
        let mut seen = HashSet::new();
        for name in service.endpoint_names() {
            if self.registry().contains(&name) || !seen.insert(name.clone()) {
                return Err(RegistrationError::DuplicateEndpoint { name });
            }
        }

        // Routes go into a copy so a rejected path leaves the live table alone.
        let mut router = self.router.clone();
        let mut records = Vec::with_capacity(service.endpoints.len());
        for spec in &service.endpoints {
            let name = http_endpoint_name(&service.prefix, &spec.path, &spec.method);
            let metrics = Arc::new(EndpointMetrics::new(name.as_str(), EndpointKind::Http));
            let entry = RouteEntry {
                endpoint: name.as_str().into(),
                handler: supervised(
                    service.compose(&spec.handler),
                    &self.supervisor,
                    &metrics,
                    self.write_timeout,
                ),
            };
            router
                .handle(spec.method.clone(), &service.route_path(&spec.path), entry)
                .map_err(|source| RegistrationError::InvalidRoute {
                    endpoint: name.clone(),
                    source,
                })?;
            records.push(metrics);
        }

        // Records exist before either table can reach them.
        for metrics in records {
            tracing::debug!(endpoint = metrics.name(), "registered http endpoint");
            self.registry().insert(metrics);
        }
        for method in service.methods {
            let name = rpc_endpoint_name(method.name());
            let metrics = self.registry().create_record(&name, EndpointKind::Rpc);
            tracing::debug!(endpoint = %name, "registered rpc method");
            self.methods.insert(method.shared_name(), MethodEntry { method, metrics });
        }
        self.router = router;

        tracing::info!(
            prefix = %service.prefix,
            rpc_methods = self.methods.len(),
            http_routes = self.router.len(),
            "service registered"
        );
        Ok(())
    }

    /// The HTTP routes installed so far.
    pub(crate) fn routes(&self) -> &Router<RouteEntry> {
        &self.router
    }

    /// Hands the RPC dispatch table over to the server.
    pub(crate) fn into_methods(self) -> MethodTable {
        self.methods
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("http_routes", &self.router.len())
            .field("rpc_methods", &self.methods.len())
            .finish()
    }
}

/// Runs `inner` behind the supervisor with the endpoint's metrics record.
///
/// The handler and its middleware are invoked inside the panic boundary,
/// and a handler that misses `write_timeout` answers `503` through it.
fn supervised(
    inner: ContextHandler,
    supervisor: &Supervisor,
    metrics: &Arc<EndpointMetrics>,
    write_timeout: Duration,
) -> ContextHandler {
    let supervisor = supervisor.clone();
    let metrics = Arc::clone(metrics);
    Arc::new(move |ctx: RequestContext, req: Request<Bytes>| {
        let supervisor = supervisor.clone();
        let metrics = Arc::clone(&metrics);
        let inner = Arc::clone(&inner);
        Box::pin(async move {
            let adapter = HttpAdapter::new(&ctx);
            let request_id = ctx.request_id();
            let record = Arc::clone(&metrics);
            let call = async move {
                match tokio::time::timeout(write_timeout, inner(ctx, req)).await {
                    Ok(response) => response,
                    Err(_) => {
                        tracing::warn!(endpoint = record.name(), request_id = %request_id, "handler timed out");
                        handler_timeout_response()
                    }
                }
            };
            supervisor.run(&adapter, &metrics, call).await
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{context_handler, error_response, json_handler, HttpResponse, JsonError};
    use crate::rpc::Status;
    use futures_util::future::BoxFuture;
    use http::StatusCode;
    use http_body_util::BodyExt;
    use janus_router::{Lookup, RouteError};
    use parking_lot::Mutex;

    fn registrar() -> Registrar {
        Registrar::new(Supervisor::new(Arc::new(MetricsRegistry::new())), Duration::from_secs(5))
    }

    fn ping() -> RpcMethod {
        RpcMethod::json("Ping", |_ctx, _req: ()| async { Ok::<_, Status>("pong") })
    }

    fn get_widget() -> JsonHandler {
        json_handler(|ctx: RequestContext, _req: ()| async move {
            let id: u64 = ctx
                .param("id")
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| JsonError::bad_request("bad id"))?;
            Ok((StatusCode::OK, serde_json::json!({ "id": id })))
        })
    }

    fn request_ctx(path: &str) -> RequestContext {
        RequestContext::new(Method::GET, path, "127.0.0.1:1".parse().unwrap(), &http::HeaderMap::new())
    }

    async fn call(registrar: &Registrar, method: Method, path: &str) -> (StatusCode, Bytes) {
        let Lookup::Found(found) = registrar.router.lookup(&method, path) else {
            panic!("no route for {method} {path}");
        };
        let ctx = request_ctx(path).with_params(found.params.clone());
        let response = (found.value.handler)(ctx, Request::new(Bytes::new())).await;
        let status = response.status();
        (status, response.into_body().collect().await.unwrap().to_bytes())
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(rpc_endpoint_name("GetWidget"), "rpc.GetWidget");
        assert_eq!(
            http_endpoint_name("/v1/", "/widgets/{id}", &Method::GET),
            "/v1/widgets/{id}.GET"
        );
        assert_eq!(http_endpoint_name("", "/x", &Method::DELETE), "/x.DELETE");
    }

    #[tokio::test]
    async fn test_register_creates_records_and_routes() {
        let mut registrar = registrar();
        let service = ServiceDescriptor::new("/v1/")
            .rpc(ping())
            .json_endpoint(Method::GET, "/widgets/{id}", get_widget());
        registrar.register(service).unwrap();

        let registry = Arc::clone(registrar.registry());
        assert_eq!(registry.names(), vec!["/v1/widgets/{id}.GET", "rpc.Ping"]);
        assert!(registrar.methods.contains_key("Ping"));

        let (status, body) = call(&registrar, Method::GET, "/v1/widgets/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), br#"{"id":42}"#);

        let record = registry.lookup("/v1/widgets/{id}.GET").unwrap();
        assert_eq!(record.status_count("2xx"), 1);
        assert_eq!(record.latency().count(), 1);
    }

    #[test]
    fn test_duplicate_within_descriptor_rejected() {
        let mut registrar = registrar();
        let service = ServiceDescriptor::new("").rpc(ping()).rpc(ping());
        assert_eq!(
            registrar.register(service).unwrap_err(),
            RegistrationError::DuplicateEndpoint {
                name: "rpc.Ping".to_string()
            }
        );
        assert!(registrar.registry().is_empty());
    }

    #[test]
    fn test_duplicate_across_services_rejected() {
        let mut registrar = registrar();
        registrar.register(ServiceDescriptor::new("").rpc(ping())).unwrap();
        let err = registrar
            .register(ServiceDescriptor::new("/other").rpc(ping()))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateEndpoint { .. }));
    }

    #[test]
    fn test_empty_method_name_rejected() {
        let mut registrar = registrar();
        let service = ServiceDescriptor::new("").rpc(RpcMethod::raw("", |_ctx, p| async move { Ok(p) }));
        assert_eq!(registrar.register(service).unwrap_err(), RegistrationError::EmptyMethodName);
    }

    #[test]
    fn test_invalid_route_leaves_tables_untouched() {
        let mut registrar = registrar();
        let service = ServiceDescriptor::new("")
            .rpc(ping())
            .json_endpoint(Method::GET, "/ok", get_widget())
            .json_endpoint(Method::GET, "/files/*rest/more", get_widget());

        let err = registrar.register(service).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::InvalidRoute {
                source: RouteError::InvalidPath { .. },
                ..
            }
        ));
        assert!(registrar.registry().is_empty());
        assert!(registrar.methods.is_empty());
        assert!(registrar.router.is_empty());
    }

    #[tokio::test]
    async fn test_middleware_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let tag = |label: &'static str, order: Arc<Mutex<Vec<&'static str>>>| {
            move |next: ContextHandler| -> ContextHandler {
                let order = Arc::clone(&order);
                Arc::new(move |ctx: RequestContext, req: Request<Bytes>| {
                    order.lock().push(label);
                    next(ctx, req)
                })
            }
        };
        let json_order = Arc::clone(&order);
        let service = ServiceDescriptor::new("")
            .middleware(tag("outer", Arc::clone(&order)))
            .context_middleware(tag("context", Arc::clone(&order)))
            .json_middleware(move |next: JsonHandler| -> JsonHandler {
                let order = Arc::clone(&json_order);
                Arc::new(move |ctx: RequestContext, req: Request<Bytes>| {
                    order.lock().push("json");
                    next(ctx, req)
                })
            })
            .json_endpoint(Method::GET, "/json", get_widget())
            .context_endpoint(
                Method::GET,
                "/plain",
                context_handler(|_ctx, _req| async { error_response(StatusCode::IM_A_TEAPOT, "tea") }),
            );

        let mut registrar = registrar();
        registrar.register(service).unwrap();

        call(&registrar, Method::GET, "/json").await;
        assert_eq!(*order.lock(), vec!["outer", "context", "json"]);

        order.lock().clear();
        let (status, _) = call(&registrar, Method::GET, "/plain").await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(*order.lock(), vec!["outer", "context"]);
    }

    #[tokio::test]
    async fn test_middleware_panic_is_supervised() {
        let service = ServiceDescriptor::new("")
            .middleware(|_next: ContextHandler| -> ContextHandler {
                Arc::new(|ctx: RequestContext, _req: Request<Bytes>| -> BoxFuture<'static, HttpResponse> {
                    panic!("middleware rejected {}", ctx.path())
                })
            })
            .json_endpoint(Method::GET, "/widgets/{id}", get_widget());
        let mut registrar = registrar();
        registrar.register(service).unwrap();

        let (status, _) = call(&registrar, Method::GET, "/widgets/1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let record = registrar.registry().lookup("/widgets/{id}.GET").unwrap();
        assert_eq!(record.panic_count(), 1);
        assert_eq!(record.status_count("5xx"), 1);
        assert_eq!(record.latency().count(), 1);
        assert_eq!(registrar.registry().panic_count(), 1);
    }

    #[tokio::test]
    async fn test_write_timeout_is_recorded() {
        let service = ServiceDescriptor::new("").context_endpoint(
            Method::GET,
            "/slow",
            context_handler(|_ctx, _req| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                error_response(StatusCode::OK, "late")
            }),
        );
        let mut registrar = Registrar::new(
            Supervisor::new(Arc::new(MetricsRegistry::new())),
            Duration::from_millis(50),
        );
        registrar.register(service).unwrap();

        let (status, _) = call(&registrar, Method::GET, "/slow").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let record = registrar.registry().lookup("/slow.GET").unwrap();
        assert_eq!(record.status_count("5xx"), 1);
        assert_eq!(record.error_count(), 1);
        assert_eq!(record.latency().count(), 1);
    }
}
