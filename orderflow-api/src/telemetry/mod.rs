//! orderflow Telemetry
//!
//! Structured JSON logging through `tracing` and Prometheus metrics for the
//! HTTP layer, the store and the pipeline.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics, metrics_handler, OrderflowMetrics, METRICS};
pub use middleware::metrics_middleware;
pub use tracer::init_tracer;
