//! Request metrics middleware.
//!
//! Spans and request/response logging come from `tower_http::trace::TraceLayer`;
//! this layer only feeds the Prometheus HTTP metrics.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};

use super::metrics::metrics;

/// Collapse numeric path segments so label cardinality stays bounded.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    if let Some(m) = metrics() {
        m.record_http_request(
            method.as_str(),
            &path,
            response.status().as_u16(),
            start.elapsed().as_secs_f64(),
        );
    }
    response
}
