//! Prometheus metrics for the workflow designer.
//!
//! All metrics follow the naming convention: `designer_<area>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Registry holding every designer metric
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // LOG STREAM
    // =========================================================================

    /// Log entries decoded and appended to the buffer
    pub static ref LOG_ENTRIES_RECEIVED: Counter = Counter::new(
        "designer_log_entries_received_total",
        "Log entries decoded from the stream"
    ).expect("metric creation failed");

    /// Log messages that could not be decoded
    pub static ref LOG_ENTRIES_DROPPED: Counter = Counter::new(
        "designer_log_entries_dropped_total",
        "Log stream messages dropped because they did not decode"
    ).expect("metric creation failed");

    /// Entries evicted from the bounded buffer
    pub static ref LOG_ENTRIES_EVICTED: Counter = Counter::new(
        "designer_log_entries_evicted_total",
        "Oldest log entries evicted to stay within capacity"
    ).expect("metric creation failed");

    /// Entries currently retained
    pub static ref LOG_BUFFER_ENTRIES: Gauge = Gauge::new(
        "designer_log_buffer_entries",
        "Log entries currently retained in the buffer"
    ).expect("metric creation failed");

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Validation requests by outcome
    pub static ref VALIDATION_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("designer_validation_requests_total", "DAG validation requests"),
        &["outcome"]  // outcome: valid/invalid/timeout/bad_reply/error
    ).expect("metric creation failed");

    /// Round trip of a validation request
    pub static ref VALIDATION_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "designer_validation_duration_seconds",
            "Time from publishing a validation request to its resolution"
        ).buckets(exponential_buckets(0.001, 2.0, 14).unwrap_or_default())
    ).expect("metric creation failed");

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// 0 disconnected, 1 connecting, 2 connected, 3 closing, 4 closed
    pub static ref CONNECTION_STATE: Gauge = Gauge::new(
        "designer_connection_state",
        "Bus connection state"
    ).expect("metric creation failed");

    /// Active subscriptions on the bus connection
    pub static ref SUBSCRIPTIONS_ACTIVE: Gauge = Gauge::new(
        "designer_subscriptions_active",
        "Active subject subscriptions"
    ).expect("metric creation failed");
}

/// Register all metrics with `REGISTRY`.
///
/// Safe to call more than once; already-registered metrics are skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(LOG_ENTRIES_RECEIVED.clone()),
        Box::new(LOG_ENTRIES_DROPPED.clone()),
        Box::new(LOG_ENTRIES_EVICTED.clone()),
        Box::new(LOG_BUFFER_ENTRIES.clone()),
        Box::new(VALIDATION_REQUESTS.clone()),
        Box::new(VALIDATION_DURATION.clone()),
        Box::new(CONNECTION_STATE.clone()),
        Box::new(SUBSCRIPTIONS_ACTIVE.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics in the Prometheus text format.
pub fn gather() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
