//! Health-check advertisement.
//!
//! The server registers one [`HealthCheck`] on the HTTP router at start and
//! stops it first during shutdown. Requests to its path are never counted by
//! the [`ActivityMonitor`].
//!
//! - [`SimpleHealthCheck`] always answers `200 ok`.
//! - [`DrainingHealthCheck`] answers `503 draining` once stopped, giving an
//!   external load balancer time to withdraw traffic before listeners close.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{header, HeaderValue, Response, StatusCode};
use http_body_util::Full;

use crate::activity::ActivityMonitor;
use crate::endpoint::HttpResponse;

/// Default health-check path.
pub const DEFAULT_HEALTH_PATH: &str = "/status.txt";

/// Default time between flipping to "draining" and waiting for idle.
pub const DEFAULT_WITHDRAW_DELAY_SECS: u64 = 5;

/// Default bound on waiting for in-flight requests while draining.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Errors from stopping a health check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    /// Requests were still in flight when the drain timeout elapsed.
    #[error("drain timed out with {remaining} requests in flight")]
    DrainTimeout {
        /// In-flight requests at the deadline.
        remaining: usize,
    },
}

/// A health-check endpoint the server advertises to load balancers.
pub trait HealthCheck: Send + Sync {
    /// Path the check is served on.
    fn path(&self) -> &str;

    /// Current health response.
    fn respond(&self) -> HttpResponse;

    /// Stops advertising the server as healthy.
    fn stop(&self) -> BoxFuture<'_, Result<(), HealthError>>;
}

/// Which health check the server installs.
#[derive(Clone)]
pub enum HealthConfig {
    /// [`SimpleHealthCheck`] on `path`.
    Simple {
        /// Path to serve.
        path: String,
    },
    /// [`DrainingHealthCheck`] on `path`.
    Draining {
        /// Path to serve.
        path: String,
        /// Delay after flipping to "draining".
        withdraw_delay: Duration,
        /// Bound on waiting for in-flight requests.
        drain_timeout: Duration,
    },
    /// A caller-supplied implementation.
    Custom(Arc<dyn HealthCheck>),
}

impl HealthConfig {
    /// Builds the configured check.
    #[must_use]
    pub fn build(&self, activity: &ActivityMonitor) -> Arc<dyn HealthCheck> {
        match self {
            Self::Simple { path } => Arc::new(SimpleHealthCheck::new(path.clone())),
            Self::Draining {
                path,
                withdraw_delay,
                drain_timeout,
            } => Arc::new(DrainingHealthCheck::new(
                path.clone(),
                activity.clone(),
                *withdraw_delay,
                *drain_timeout,
            )),
            Self::Custom(check) => Arc::clone(check),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self::Draining {
            path: DEFAULT_HEALTH_PATH.to_string(),
            withdraw_delay: Duration::from_secs(DEFAULT_WITHDRAW_DELAY_SECS),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for HealthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple { path } => f.debug_struct("Simple").field("path", path).finish(),
            Self::Draining {
                path,
                withdraw_delay,
                drain_timeout,
            } => f
                .debug_struct("Draining")
                .field("path", path)
                .field("withdraw_delay", withdraw_delay)
                .field("drain_timeout", drain_timeout)
                .finish(),
            Self::Custom(check) => f.debug_tuple("Custom").field(&check.path()).finish(),
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Always-healthy check.
#[derive(Debug, Clone)]
pub struct SimpleHealthCheck {
    path: String,
    started_at: Instant,
}

impl SimpleHealthCheck {
    /// Creates a check served on `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            started_at: Instant::now(),
        }
    }

    /// Time since the check was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl HealthCheck for SimpleHealthCheck {
    fn path(&self) -> &str {
        &self.path
    }

    fn respond(&self) -> HttpResponse {
        text_response(StatusCode::OK, "ok\n")
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), HealthError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Load-balancer-aware check that drains before the server closes.
///
/// `stop` flips the response to `503 draining`, sleeps for the withdraw
/// delay, then waits for the activity count to reach zero (bounded by the
/// drain timeout).
#[derive(Debug)]
pub struct DrainingHealthCheck {
    path: String,
    activity: ActivityMonitor,
    ready: AtomicBool,
    withdraw_delay: Duration,
    drain_timeout: Duration,
}

impl DrainingHealthCheck {
    /// Creates a check served on `path`, reading readiness from `activity`.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        activity: ActivityMonitor,
        withdraw_delay: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            activity,
            ready: AtomicBool::new(true),
            withdraw_delay,
            drain_timeout,
        }
    }

    /// Returns `true` until `stop` is called.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl HealthCheck for DrainingHealthCheck {
    fn path(&self) -> &str {
        &self.path
    }

    fn respond(&self) -> HttpResponse {
        if self.is_ready() {
            text_response(StatusCode::OK, "ok\n")
        } else {
            text_response(StatusCode::SERVICE_UNAVAILABLE, "draining\n")
        }
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), HealthError>> {
        Box::pin(async move {
            self.ready.store(false, Ordering::SeqCst);
            tracing::info!(
                in_flight = self.activity.count(),
                withdraw_delay_ms = u64::try_from(self.withdraw_delay.as_millis()).unwrap_or(u64::MAX),
                "health check draining"
            );

            tokio::time::sleep(self.withdraw_delay).await;

            match tokio::time::timeout(self.drain_timeout, self.activity.wait_idle()).await {
                Ok(()) => Ok(()),
                Err(_) => Err(HealthError::DrainTimeout {
                    remaining: self.activity.count(),
                }),
            }
        })
    }
}
