//! Per-endpoint instrumentation records.
//!
//! A [`MetricsRegistry`] belongs to one server instance. The registrar
//! creates exactly one [`EndpointMetrics`] record per canonical endpoint name
//! before the server starts, and the supervision wrappers look the record up
//! on every request.
//!
//! Each record keeps its own in-process counters and [`LatencyHistogram`]
//! and mirrors every observation into the `metrics` facade, so an installed
//! exporter (see `janus_telemetry::init_metrics`) publishes the same data:
//!
//! | Protocol | Series                                              |
//! |----------|-----------------------------------------------------|
//! | HTTP     | `<name>.STATUS-COUNT{class}`, `<name>.DURATION`, `<name>.PANIC` |
//! | RPC      | `rpc.<Method>.DURATION`, `.SUCCESS`, `.ERROR`, `.PANIC` |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use http::StatusCode;
use janus_telemetry::DURATION_BUCKETS_MS;
use metrics::{Counter, Histogram};

/// Percentile markers reported for every latency histogram.
pub const PERCENTILES: [f64; 5] = [50.0, 75.0, 90.0, 95.0, 99.0];

/// Name of the server-wide recovered-panic counter.
pub const PANIC_COUNTER: &str = "panic";

const STATUS_CLASSES: [&str; 5] = ["1xx", "2xx", "3xx", "4xx", "5xx"];

/// Result classification of one supervised call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler completed normally.
    Success,
    /// The handler returned an error (or an HTTP 5xx).
    Error,
    /// The handler panicked and the panic was recovered.
    Panic,
}

/// Protocol an endpoint is served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// JSON/HTTP endpoint.
    Http,
    /// gRPC method.
    Rpc,
}

// ============================================================================
// Latency histogram
// ============================================================================

/// Fixed-bucket latency histogram in milliseconds.
///
/// Buckets come from [`DURATION_BUCKETS_MS`]; samples above the last bound
/// land in the last bucket. Percentiles resolve to a bucket upper bound.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl LatencyHistogram {
    /// Creates an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DURATION_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    /// Records one sample.
    pub fn observe(&self, elapsed: Duration) {
        let ms = duration_ms(elapsed);
        let idx = DURATION_BUCKETS_MS
            .partition_point(|bound| *bound < ms)
            .min(DURATION_BUCKETS_MS.len() - 1);

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Number of samples recorded.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all samples.
    #[must_use]
    pub fn sum(&self) -> Duration {
        Duration::from_micros(self.sum_micros.load(Ordering::Relaxed))
    }

    /// Upper bound (ms) of the bucket holding the `p`th percentile.
    ///
    /// Returns `None` when the histogram is empty.
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return None;
        }

        let rank = ((p.clamp(0.0, 100.0) / 100.0) * total as f64).ceil().max(1.0);
        let mut seen = 0u64;
        for (bound, count) in DURATION_BUCKETS_MS.iter().zip(&counts) {
            seen += count;
            if seen as f64 >= rank {
                return Some(*bound);
            }
        }
        DURATION_BUCKETS_MS.last().copied()
    }

    /// Point-in-time copy of the histogram.
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count(),
            sum: self.sum(),
            percentiles: PERCENTILES
                .iter()
                .filter_map(|p| self.percentile(*p).map(|v| (*p, v)))
                .collect(),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot returned by [`LatencyHistogram::snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of samples.
    pub count: u64,
    /// Sum of samples.
    pub sum: Duration,
    /// `(percentile, bucket upper bound in ms)` pairs; empty with no samples.
    pub percentiles: Vec<(f64, f64)>,
}

fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

// ============================================================================
// Endpoint record
// ============================================================================

/// Instrumentation record for one canonical endpoint name.
#[derive(Debug)]
pub struct EndpointMetrics {
    name: Arc<str>,
    kind: EndpointKind,
    latency: LatencyHistogram,
    success: AtomicU64,
    error: AtomicU64,
    panic: AtomicU64,
    status_classes: [AtomicU64; 5],
    sink: FacadeHandles,
}

#[derive(Debug)]
struct FacadeHandles {
    duration: Histogram,
    success: Counter,
    error: Counter,
    panic: Counter,
    status_classes: [Counter; 5],
}

impl FacadeHandles {
    fn register(name: &str, kind: EndpointKind) -> Self {
        let duration = metrics::histogram!(format!("{name}.DURATION"));
        let panic = metrics::counter!(format!("{name}.PANIC"));

        match kind {
            EndpointKind::Rpc => Self {
                duration,
                success: metrics::counter!(format!("{name}.SUCCESS")),
                error: metrics::counter!(format!("{name}.ERROR")),
                panic,
                status_classes: std::array::from_fn(|_| Counter::noop()),
            },
            EndpointKind::Http => {
                let series = format!("{name}.STATUS-COUNT");
                Self {
                    duration,
                    success: Counter::noop(),
                    error: Counter::noop(),
                    panic,
                    status_classes: STATUS_CLASSES
                        .map(|class| metrics::counter!(series.clone(), "class" => class)),
                }
            }
        }
    }
}

impl EndpointMetrics {
    /// Creates a record and registers its facade series.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, kind: EndpointKind) -> Self {
        let name = name.into();
        let sink = FacadeHandles::register(&name, kind);
        Self {
            name,
            kind,
            latency: LatencyHistogram::new(),
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            panic: AtomicU64::new(0),
            status_classes: std::array::from_fn(|_| AtomicU64::new(0)),
            sink,
        }
    }

    /// Records the outcome and latency of one call.
    ///
    /// A recovered panic is also an error outcome, so it bumps both counters.
    pub fn observe(&self, outcome: Outcome, elapsed: Duration) {
        self.latency.observe(elapsed);
        self.sink.duration.record(duration_ms(elapsed));

        match outcome {
            Outcome::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
                self.sink.success.increment(1);
            }
            Outcome::Error => {
                self.error.fetch_add(1, Ordering::Relaxed);
                self.sink.error.increment(1);
            }
            Outcome::Panic => {
                self.panic.fetch_add(1, Ordering::Relaxed);
                self.sink.panic.increment(1);
                self.error.fetch_add(1, Ordering::Relaxed);
                self.sink.error.increment(1);
            }
        }
    }

    /// Records the status code written for an HTTP request.
    pub fn observe_status(&self, status: StatusCode) {
        let idx = usize::from(status.as_u16() / 100).clamp(1, 5) - 1;
        self.status_classes[idx].fetch_add(1, Ordering::Relaxed);
        self.sink.status_classes[idx].increment(1);
    }

    /// Canonical endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol this record instruments.
    #[must_use]
    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Latency histogram.
    #[must_use]
    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }

    /// Successful calls.
    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    /// Failed calls, recovered panics included.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error.load(Ordering::Relaxed)
    }

    /// Recovered panics.
    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.panic.load(Ordering::Relaxed)
    }

    /// Responses observed for a status class (`"2xx"`, `"5xx"`, ...).
    #[must_use]
    pub fn status_count(&self, class: &str) -> u64 {
        STATUS_CLASSES
            .iter()
            .position(|c| *c == class)
            .map_or(0, |idx| self.status_classes[idx].load(Ordering::Relaxed))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Map from canonical endpoint name to its [`EndpointMetrics`] record.
///
/// Internally synchronized; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    records: DashMap<String, Arc<EndpointMetrics>>,
    panics: AtomicU64,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        metrics::describe_counter!(PANIC_COUNTER, "Recovered panics across all endpoints");
        Self::default()
    }

    /// Creates the record for `name` and returns it.
    ///
    /// Creating a name twice replaces the earlier record; the registrar
    /// rejects duplicate names before calling this.
    pub fn create_record(&self, name: &str, kind: EndpointKind) -> Arc<EndpointMetrics> {
        let record = Arc::new(EndpointMetrics::new(name, kind));
        self.insert(Arc::clone(&record));
        record
    }

    /// Adds a record built ahead of time, keyed by its name.
    pub fn insert(&self, record: Arc<EndpointMetrics>) {
        let name = record.name().to_string();
        if self.records.insert(name.clone(), record).is_some() {
            tracing::warn!(endpoint = %name, "replaced existing metrics record");
        }
    }

    /// Returns the record for `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<EndpointMetrics>> {
        self.records.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns `true` if a record exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Counts a recovered panic on the server-wide counter.
    pub fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(PANIC_COUNTER).increment(1);
    }

    /// Recovered panics across all endpoints.
    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}
