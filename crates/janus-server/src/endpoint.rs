//! HTTP endpoint calling conventions and middleware hooks.
//!
//! Two conventions are supported:
//!
//! - **Context endpoints** take the [`RequestContext`] and the buffered
//!   request and return a full response.
//! - **JSON endpoints** take the context and a typed input decoded from the
//!   body and return `(StatusCode, Output)` or a [`JsonError`].
//!
//! Middleware hooks are plain functions from handler to handler.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::RequestContext;

/// Response type produced by every HTTP handler.
pub type HttpResponse = Response<Full<Bytes>>;

/// Type-erased context endpoint.
pub type ContextHandler =
    Arc<dyn Fn(RequestContext, Request<Bytes>) -> BoxFuture<'static, HttpResponse> + Send + Sync>;

/// Result of a type-erased JSON endpoint.
pub type JsonResult = Result<(StatusCode, Value), JsonError>;

/// Type-erased JSON endpoint.
pub type JsonHandler =
    Arc<dyn Fn(RequestContext, Request<Bytes>) -> BoxFuture<'static, JsonResult> + Send + Sync>;

/// Middleware over context handlers.
pub type Middleware = Arc<dyn Fn(ContextHandler) -> ContextHandler + Send + Sync>;

/// Middleware over JSON handlers.
pub type JsonMiddleware = Arc<dyn Fn(JsonHandler) -> JsonHandler + Send + Sync>;

/// Error returned by a JSON endpoint, rendered as `{"error": message}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}: {message}")]
pub struct JsonError {
    /// Response status.
    pub status: StatusCode,
    /// Message placed in the `error` field.
    pub message: String,
}

impl JsonError {
    /// Creates an error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// `400 Bad Request`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// `404 Not Found`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// `500 Internal Server Error`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

/// Erases an async context endpoint function.
pub fn context_handler<F, Fut>(f: F) -> ContextHandler
where
    F: Fn(RequestContext, Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    Arc::new(move |ctx, req| Box::pin(f(ctx, req)))
}

/// Erases an async JSON endpoint function with typed input and output.
///
/// An empty body decodes as JSON `null`, so `Option<T>` and `()` inputs
/// accept bodiless requests. A body that does not decode answers `400`.
pub fn json_handler<I, O, F, Fut>(f: F) -> JsonHandler
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(StatusCode, O), JsonError>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |ctx, req: Request<Bytes>| {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let body = req.into_body();
            let raw: &[u8] = if body.is_empty() { &b"null"[..] } else { &body[..] };
            let input: I = serde_json::from_slice(raw)
                .map_err(|e| JsonError::bad_request(format!("invalid request body: {e}")))?;

            let (status, output) = f(ctx, input).await?;
            let value = serde_json::to_value(output)
                .map_err(|e| JsonError::internal(format!("failed to encode response: {e}")))?;
            Ok((status, value))
        })
    })
}

/// Adapts a JSON handler to the context convention.
#[must_use]
pub fn json_to_http(handler: JsonHandler) -> ContextHandler {
    Arc::new(move |ctx, req| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            match handler(ctx, req).await {
                Ok((status, value)) => json_response(status, &value),
                Err(err) => error_response(err.status, &err.message),
            }
        })
    })
}

/// Serializes `value` into a JSON response.
#[must_use]
pub fn json_response(status: StatusCode, value: &Value) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// `{"error": message}` with the given status.
#[must_use]
pub fn error_response(status: StatusCode, message: &str) -> HttpResponse {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// The `503` written when a handler misses the write timeout.
#[must_use]
pub fn handler_timeout_response() -> HttpResponse {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "handler timed out")
}
