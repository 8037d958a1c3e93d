//! # Janus Server
//!
//! One set of service operations served over two protocols at once: unary
//! gRPC calls (served by tonic) on one port and JSON over HTTP/1.1 on
//! another.
//!
//! - **Registration**: a [`ServiceDescriptor`] lists RPC methods and HTTP
//!   endpoints; [`Server::register`] validates it, creates one metrics record
//!   per operation and installs every operation behind the [`Supervisor`].
//! - **Supervision**: each call is timed, classified (success, error or
//!   panic) and isolated behind a panic boundary. A panicking handler fails
//!   only its own request.
//! - **Activity**: the [`ActivityMonitor`] counts in-flight requests on both
//!   protocols; the draining health check waits for it to reach zero.
//! - **Lifecycle**: [`Server::stop`] stops the health check, drains the RPC
//!   server, then closes the HTTP listener.
//!
//! ## Example
//!
//! ```rust,no_run
//! use http::{Method, StatusCode};
//! use janus_server::endpoint::{json_handler, JsonError};
//! use janus_server::rpc::{RpcMethod, Status};
//! use janus_server::{RequestContext, Server, ServerConfig, ServiceDescriptor};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct Widget {
//!     id: u64,
//! }
//!
//! #[derive(Deserialize)]
//! struct GetWidget {
//!     id: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let widgets = ServiceDescriptor::new("/v1")
//!         .rpc(RpcMethod::json("GetWidget", |_ctx, req: GetWidget| async move {
//!             Ok::<_, Status>(Widget { id: req.id })
//!         }))
//!         .json_endpoint(
//!             Method::GET,
//!             "/widgets/{id}",
//!             json_handler(|ctx: RequestContext, _body: ()| async move {
//!                 let id = ctx
//!                     .param("id")
//!                     .and_then(|id| id.parse().ok())
//!                     .ok_or_else(|| JsonError::bad_request("id must be a number"))?;
//!                 Ok((StatusCode::OK, Widget { id }))
//!             }),
//!         );
//!
//!     let mut server = Server::new(ServerConfig::default());
//!     server.register(widgets)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/janus-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod access_log;
pub mod activity;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod metrics;
mod panic;
pub mod rpc;
mod server;
pub mod service;
mod shutdown;
pub mod supervise;

pub use access_log::{AccessLog, AccessLogError};
pub use activity::{ActivityGuard, ActivityMonitor};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use context::{RequestContext, RequestId, RpcContext, REQUEST_ID_HEADER};
pub use endpoint::{ContextHandler, HttpResponse, JsonError, JsonHandler};
pub use error::{RegistrationError, ServerError, ServerResult};
pub use health::{DrainingHealthCheck, HealthCheck, HealthConfig, HealthError, SimpleHealthCheck};
pub use metrics::{EndpointKind, EndpointMetrics, MetricsRegistry, Outcome};
pub use panic::{panic_message, PanicReport};
pub use server::{LifecycleState, Server};
pub use service::{RpcService, ServiceDescriptor};
pub use shutdown::wait_for_os_signal;
pub use supervise::{CallScope, HttpAdapter, ProtocolAdapter, RpcAdapter, Supervisor};
