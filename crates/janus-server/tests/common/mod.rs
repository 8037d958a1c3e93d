//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use std::time::Duration;

use http::{Method, StatusCode};
use janus_server::endpoint::{context_handler, json_handler, json_response, JsonError};
use janus_server::rpc::{RpcClient, RpcMethod, Status};
use janus_server::{
    HealthConfig, RequestContext, Server, ServerConfig, ServerConfigBuilder, ServiceDescriptor,
};
use serde::{Deserialize, Serialize};

pub const HEALTH_PATH: &str = "/status.txt";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Widget {
    pub id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetWidget {
    pub id: u64,
}

/// Loopback listeners on ephemeral ports and a draining health check with
/// no withdraw delay.
pub fn config() -> ServerConfigBuilder {
    ServerConfig::builder()
        .http_addr("127.0.0.1:0")
        .rpc_addr("127.0.0.1:0")
        .shutdown_timeout(Duration::from_secs(5))
        .health(HealthConfig::Draining {
            path: HEALTH_PATH.to_string(),
            withdraw_delay: Duration::ZERO,
            drain_timeout: Duration::from_secs(10),
        })
}

/// The widgets service.
///
/// - `GET /v1/widgets/{id}`: `{"id": id}`; id 0 panics, id 404 is not found
/// - `GET /v1/sleep/{ms}`: sleeps, then answers `{"slept": ms}`
/// - `GET /v1/inflight`: the server's current activity count
/// - `rpc GetWidget`: id 0 is `NotFound`, id 13 panics
/// - `rpc Sleep`: sleeps for the given milliseconds
pub fn widgets() -> ServiceDescriptor {
    ServiceDescriptor::new("/v1/")
        .json_endpoint(
            Method::GET,
            "/widgets/{id}",
            json_handler(|ctx: RequestContext, _body: ()| async move {
                let id: u64 = ctx
                    .param("id")
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(|| JsonError::bad_request("id must be a number"))?;
                match id {
                    0 => panic!("boom"),
                    404 => Err(JsonError::not_found(format!("widget {id} not found"))),
                    _ => Ok((StatusCode::OK, Widget { id })),
                }
            }),
        )
        .context_endpoint(
            Method::GET,
            "/sleep/{ms}",
            context_handler(|ctx: RequestContext, _req| async move {
                let ms: u64 = ctx.param("ms").and_then(|ms| ms.parse().ok()).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                json_response(StatusCode::OK, &serde_json::json!({ "slept": ms }))
            }),
        )
        .rpc(RpcMethod::json("GetWidget", |_ctx, req: GetWidget| async move {
            match req.id {
                0 => Err(Status::not_found("no widget 0")),
                13 => panic!("boom"),
                id => Ok(Widget { id }),
            }
        }))
        .rpc(RpcMethod::json("Sleep", |_ctx, ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, Status>(ms)
        }))
}

/// Creates, registers and starts a server.
pub async fn start(config: ServerConfig, services: Vec<ServiceDescriptor>) -> Server {
    let mut server = Server::new(config);
    for service in services {
        server.register(service).unwrap();
    }
    server.start().await.unwrap();
    server
}

pub fn url(server: &Server, path: &str) -> String {
    format!("http://{}{}", server.http_addr().unwrap(), path)
}

pub async fn rpc_client(server: &Server) -> RpcClient {
    RpcClient::connect(server.rpc_addr().unwrap()).await.unwrap()
}

/// Polls `f` until it returns true or two seconds pass.
pub async fn eventually(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    f()
}

/// A client that never goes through a proxy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub async fn get(server: &Server, path: &str) -> reqwest::Response {
    http_client().get(url(server, path)).send().await.unwrap()
}
