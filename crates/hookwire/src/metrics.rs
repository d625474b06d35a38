//! Prometheus metrics for hookwire.
//!
//! Tracks interception decisions, delivery outcomes, and upstream relays.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_gauge,
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    /// Interception decisions
    pub static ref INTERCEPTED_TOTAL: CounterVec = register_counter_vec!(
        "hookwire_intercepted_total",
        "Total number of requests offered for interception",
        &["disposition"]  // disposition: handler|upstream|not_intercepted
    )
    .unwrap();

    /// Terminal outcomes of response contexts
    pub static ref DELIVERIES_TOTAL: CounterVec = register_counter_vec!(
        "hookwire_deliveries_total",
        "Total number of terminal response outcomes",
        &["outcome"]  // outcome: completed|failed|cancelled|abandoned
    )
    .unwrap();

    /// Predicates that failed to evaluate
    pub static ref PREDICATE_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "hookwire_predicate_errors_total",
        "Total number of predicate evaluation failures",
        &["source"]  // source: handler|upstream
    )
    .unwrap();

    /// Handler panics caught by the engine
    pub static ref HANDLER_PANICS_TOTAL: IntCounter = register_int_counter!(
        "hookwire_handler_panics_total",
        "Total number of handler panics converted into failures"
    )
    .unwrap();

    /// Bytes relayed through piped responses
    pub static ref PIPED_BYTES_TOTAL: IntCounter = register_int_counter!(
        "hookwire_piped_bytes_total",
        "Total number of body bytes relayed through piped responses"
    )
    .unwrap();

    /// Response contexts not yet dropped
    pub static ref ACTIVE_CONTEXTS: IntGauge = register_int_gauge!(
        "hookwire_active_contexts",
        "Number of live response contexts"
    )
    .unwrap();

    /// Upstream relay duration
    pub static ref UPSTREAM_DURATION_MS: HistogramVec = register_histogram_vec!(
        "hookwire_upstream_duration_ms",
        "Duration of upstream relays in milliseconds",
        &["outcome"],  // outcome: completed|failed|cancelled
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Requests answered by the HTTP server
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "hookwire_requests_total",
        "Total number of requests answered by the server",
        &["method", "status"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_interception(disposition: &str) {
    INTERCEPTED_TOTAL.with_label_values(&[disposition]).inc();
}

pub fn record_delivery(outcome: &str) {
    DELIVERIES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_predicate_error(source: &str) {
    PREDICATE_ERRORS_TOTAL.with_label_values(&[source]).inc();
}

pub fn record_handler_panic() {
    HANDLER_PANICS_TOTAL.inc();
}

pub fn record_piped_bytes(len: usize) {
    PIPED_BYTES_TOTAL.inc_by(len as u64);
}

pub fn record_upstream_duration(outcome: &str, duration_ms: f64) {
    UPSTREAM_DURATION_MS
        .with_label_values(&[outcome])
        .observe(duration_ms);
}

/// Helper to record request processing
pub fn record_request(method: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
}
