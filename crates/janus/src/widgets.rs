//! In-memory widgets service, served over both protocols.
//!
//! | Operation | RPC | HTTP |
//! |-----------|-----|------|
//! | fetch one | `GetWidget` | `GET /v1/widgets/{id}` |
//! | create | `CreateWidget` | `POST /v1/widgets` |
//! | list | `ListWidgets` | `GET /v1/widgets` |

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http::{Method, StatusCode};
use janus_server::endpoint::{json_handler, JsonError};
use janus_server::rpc::{RpcMethod, Status};
use janus_server::{RequestContext, RpcContext, ServiceDescriptor};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A stored widget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Widget {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct GetWidget {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateWidget {
    pub name: String,
}

/// Shared widget storage.
#[derive(Debug, Default)]
pub struct WidgetStore {
    next_id: AtomicU64,
    widgets: RwLock<BTreeMap<u64, Widget>>,
}

impl WidgetStore {
    pub fn get(&self, id: u64) -> Option<Widget> {
        self.widgets.read().get(&id).cloned()
    }

    pub fn create(&self, name: String) -> Widget {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let widget = Widget { id, name };
        self.widgets.write().insert(id, widget.clone());
        widget
    }

    pub fn list(&self) -> Vec<Widget> {
        self.widgets.read().values().cloned().collect()
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must not be empty".to_string());
    }
    Ok(())
}

/// Builds the service descriptor over `store`.
pub fn service(store: Arc<WidgetStore>) -> ServiceDescriptor {
    let rpc_get = Arc::clone(&store);
    let rpc_create = Arc::clone(&store);
    let rpc_list = Arc::clone(&store);
    let http_get = Arc::clone(&store);
    let http_create = Arc::clone(&store);
    let http_list = store;

    ServiceDescriptor::new("/v1")
        .rpc(RpcMethod::json("GetWidget", move |_ctx: RpcContext, req: GetWidget| {
            let widget = rpc_get.get(req.id);
            async move { widget.ok_or_else(|| Status::not_found(format!("no widget {}", req.id))) }
        }))
        .rpc(RpcMethod::json("CreateWidget", move |_ctx: RpcContext, req: CreateWidget| {
            let created = validate_name(&req.name)
                .map(|()| rpc_create.create(req.name))
                .map_err(Status::invalid_argument);
            async move { created }
        }))
        .rpc(RpcMethod::json("ListWidgets", move |_ctx: RpcContext, (): ()| {
            let widgets = rpc_list.list();
            async move { Ok::<_, Status>(widgets) }
        }))
        .json_endpoint(
            Method::GET,
            "/widgets/{id}",
            json_handler(move |ctx: RequestContext, (): ()| {
                let found = ctx
                    .param("id")
                    .and_then(|id| id.parse::<u64>().ok())
                    .ok_or_else(|| JsonError::bad_request("id must be a number"))
                    .and_then(|id| {
                        http_get
                            .get(id)
                            .ok_or_else(|| JsonError::not_found(format!("widget {id} not found")))
                    });
                async move { found.map(|widget| (StatusCode::OK, widget)) }
            }),
        )
        .json_endpoint(
            Method::POST,
            "/widgets",
            json_handler(move |_ctx: RequestContext, req: CreateWidget| {
                let created = validate_name(&req.name)
                    .map(|()| http_create.create(req.name))
                    .map_err(JsonError::bad_request);
                async move { created.map(|widget| (StatusCode::CREATED, widget)) }
            }),
        )
        .json_endpoint(
            Method::GET,
            "/widgets",
            json_handler(move |_ctx: RequestContext, (): ()| {
                let widgets = http_list.list();
                async move { Ok::<_, JsonError>((StatusCode::OK, widgets)) }
            }),
        )
}
