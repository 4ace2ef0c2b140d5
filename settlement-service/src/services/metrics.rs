//! Prometheus metrics for settlement-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

/// Counter for finished reconciliation flows by terminal outcome.
pub static SETTLEMENT_FLOWS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_flows_total",
        "Total number of reconciliation flows by outcome",
        &["outcome"]
    )
    .expect("Failed to register SETTLEMENT_FLOWS")
});

/// Counter for FAC report attempts.
pub static REPORT_ATTEMPTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_report_attempts_total",
        "Total number of FAC report generation attempts",
        &["status"]
    )
    .expect("Failed to register REPORT_ATTEMPTS")
});

/// Histogram for windows compared per flow.
pub static SEARCH_ITERATIONS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "settlement_search_iterations",
        "Windows compared before a flow terminated",
        vec![1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 12.0]
    )
    .expect("Failed to register SEARCH_ITERATIONS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "settlement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for notifications by kind and status.
pub static NOTIFICATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_notifications_total",
        "Total number of settlement notifications",
        &["kind", "status"]
    )
    .expect("Failed to register NOTIFICATIONS")
});

/// Counter for triggers turned away by a full queue.
pub static QUEUE_REJECTIONS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "settlement_queue_rejections_total",
        "Total number of triggers rejected because the work queue was full"
    )
    .expect("Failed to register QUEUE_REJECTIONS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SETTLEMENT_FLOWS);
    Lazy::force(&REPORT_ATTEMPTS);
    Lazy::force(&SEARCH_ITERATIONS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&NOTIFICATIONS);
    Lazy::force(&QUEUE_REJECTIONS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a terminal flow outcome.
pub fn record_flow(outcome: &str) {
    SETTLEMENT_FLOWS.with_label_values(&[outcome]).inc();
}

/// Record a report attempt (`success`, `failure` or `cached`).
pub fn record_report_attempt(status: &str) {
    REPORT_ATTEMPTS.with_label_values(&[status]).inc();
}

pub fn record_search_iterations(iterations: u32) {
    SEARCH_ITERATIONS.observe(f64::from(iterations));
}

/// Record a notification send.
pub fn record_notification(kind: &str, status: &str) {
    NOTIFICATIONS.with_label_values(&[kind, status]).inc();
}

pub fn record_queue_rejection() {
    QUEUE_REJECTIONS.inc();
}
