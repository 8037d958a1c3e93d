//! In-flight request tracking.
//!
//! The [`ActivityMonitor`] is shared by the HTTP front end, the RPC server
//! and the draining health check. Health-check requests are never counted,
//! otherwise the load balancer's own polling would keep the count above zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Concurrency-safe count of requests currently executing.
///
/// Cloning is cheap; all clones observe the same counter.
///
/// ```rust
/// use janus_server::ActivityMonitor;
///
/// let monitor = ActivityMonitor::new();
/// let guard = monitor.track();
/// assert_eq!(monitor.count(), 1);
/// drop(guard);
/// assert_eq!(monitor.count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ActivityMonitor {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    active: AtomicUsize,
    idle: Notify,
}

impl ActivityMonitor {
    /// Creates a monitor with a zero count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a request.
    pub fn count_request(&self) {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Records the end of a request.
    ///
    /// The count never goes below zero; an unmatched call is logged and
    /// ignored.
    pub fn uncount_request(&self) {
        let prev = self
            .inner
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match prev {
            Ok(1) => self.inner.idle.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::warn!("uncount_request called with no request in flight"),
        }
    }

    /// Returns the number of requests in flight.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Counts a request until the returned guard is dropped.
    ///
    /// The guard decrements on every exit path, including unwinding.
    #[must_use]
    pub fn track(&self) -> ActivityGuard {
        self.count_request();
        ActivityGuard {
            monitor: self.clone(),
        }
    }

    /// Completes once no requests are in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent final uncount is not missed.
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII guard returned by [`ActivityMonitor::track`].
#[derive(Debug)]
pub struct ActivityGuard {
    monitor: ActivityMonitor,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.monitor.uncount_request();
    }
}
