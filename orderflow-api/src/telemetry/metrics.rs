//! Prometheus Metrics Definitions
//!
//! HTTP, database and read metrics are recorded as they happen. Pipeline
//! totals live in atomics owned by the pipeline and are copied into gauges
//! on every scrape.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use orderflow_ingest::{PipelineSnapshot, ReadSource};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

use crate::state::AppState;

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Database operation latency buckets (seconds)
const DB_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Global metrics instance, registered on first use.
pub static METRICS: Lazy<Result<OrderflowMetrics, prometheus::Error>> =
    Lazy::new(OrderflowMetrics::new);

/// The registered metrics, or `None` if registration failed.
pub fn metrics() -> Option<&'static OrderflowMetrics> {
    METRICS.as_ref().ok()
}

pub struct OrderflowMetrics {
    /// labels: method, path, status
    pub http_requests_total: IntCounterVec,

    /// labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// labels: operation, status
    pub db_operations_total: IntCounterVec,

    /// labels: operation
    pub db_operation_duration_seconds: HistogramVec,

    /// labels: source (cache, store, not_found, error)
    pub order_reads_total: IntCounterVec,

    /// Raw messages accepted by `POST /messages`
    pub messages_enqueued_total: IntCounter,

    /// labels: result; mirrors the pipeline's own counters
    pub pipeline_orders: IntGaugeVec,
}

impl OrderflowMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            http_requests_total: register_int_counter_vec!(
                "orderflow_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )?,
            http_request_duration_seconds: register_histogram_vec!(
                "orderflow_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )?,
            db_operations_total: register_int_counter_vec!(
                "orderflow_db_operations_total",
                "Total number of database operations",
                &["operation", "status"]
            )?,
            db_operation_duration_seconds: register_histogram_vec!(
                "orderflow_db_operation_duration_seconds",
                "Database operation duration in seconds",
                &["operation"],
                DB_LATENCY_BUCKETS.to_vec()
            )?,
            order_reads_total: register_int_counter_vec!(
                "orderflow_order_reads_total",
                "Order reads by where they were served from",
                &["source"]
            )?,
            messages_enqueued_total: register_int_counter!(
                "orderflow_messages_enqueued_total",
                "Raw messages accepted for ingestion over HTTP"
            )?,
            pipeline_orders: register_int_gauge_vec!(
                "orderflow_pipeline_orders",
                "Pipeline inputs since startup by result",
                &["result"]
            )?,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_db_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.db_operations_total
            .with_label_values(&[operation, status])
            .inc();
        self.db_operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn record_read(&self, source: ReadSource) {
        self.order_reads_total
            .with_label_values(&[source.as_str()])
            .inc();
    }

    pub fn record_read_failure(&self, not_found: bool) {
        let label = if not_found { "not_found" } else { "error" };
        self.order_reads_total.with_label_values(&[label]).inc();
    }

    pub fn set_pipeline(&self, snapshot: &PipelineSnapshot) {
        for (result, value) in [
            ("received", snapshot.received),
            ("done", snapshot.done),
            ("failed_decode", snapshot.failed_decode),
            ("failed_store", snapshot.failed_store),
            ("cache_advisory", snapshot.cache_advisories),
            ("replay", snapshot.replays),
        ] {
            self.pipeline_orders
                .with_label_values(&[result])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }
}

/// Handler for GET /metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(m) = metrics() {
        m.set_pipeline(&state.pipeline_metrics.snapshot());
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let m = metrics().expect("metrics registered");
        m.record_http_request("GET", "/order", 200, 0.002);
        m.record_read(ReadSource::Cache);
        assert!(
            m.http_requests_total
                .with_label_values(&["GET", "/order", "200"])
                .get()
                >= 1
        );
        // Second access reuses the same registration.
        assert!(metrics().is_some());
    }

    #[test]
    fn test_pipeline_gauges_follow_snapshot() {
        let m = metrics().expect("metrics registered");
        let snapshot = PipelineSnapshot {
            received: 5,
            done: 3,
            failed_decode: 1,
            failed_store: 1,
            cache_advisories: 0,
            replays: 2,
        };
        m.set_pipeline(&snapshot);
        assert_eq!(m.pipeline_orders.with_label_values(&["done"]).get(), 3);
        assert_eq!(m.pipeline_orders.with_label_values(&["replay"]).get(), 2);
    }
}
