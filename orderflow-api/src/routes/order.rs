//! Order read endpoints.
//!
//! - `GET /order?id=<id>`: HTML page, plain-text errors
//! - `GET /api/orders/:id`: JSON order, [`ApiError`] bodies
//! - `GET /api/orders`: ids recorded by the pipeline since startup

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use orderflow_core::{Order, OrderId, OrderflowResult};
use orderflow_ingest::ReadResult;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::page::render_order_page;
use crate::state::AppState;
use crate::telemetry::metrics;

const INVALID_ID: &str = "Invalid order ID";
const NOT_FOUND: &str = "Order not found";
const INTERNAL: &str = "Internal server error";

fn parse_id(raw: Option<&str>) -> Option<OrderId> {
    raw.and_then(|s| s.trim().parse::<OrderId>().ok())
}

/// Read through the cache and record where the answer came from.
async fn read(state: &AppState, id: OrderId) -> OrderflowResult<ReadResult> {
    let result = state.read_path.get(id).await;
    if let Some(m) = metrics() {
        match &result {
            Ok(read) => m.record_read(read.source),
            Err(e) => m.record_read_failure(e.is_not_found()),
        }
    }
    result
}

/// GET /order?id=<id>
pub async fn order_page(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(id) = parse_id(params.get("id").map(String::as_str)) else {
        return (StatusCode::BAD_REQUEST, INVALID_ID).into_response();
    };

    match read(&state, id).await {
        Ok(result) => {
            tracing::debug!(order_id = id, source = result.source.as_str(), "Serving order page");
            Html(render_order_page(&result.order)).into_response()
        }
        Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, NOT_FOUND).into_response(),
        Err(e) => {
            tracing::error!(order_id = id, error = %e, "Order page failed");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL).into_response()
        }
    }
}

/// GET /api/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Order>> {
    let id = parse_id(Some(&raw_id)).ok_or_else(|| ApiError::invalid_input(INVALID_ID))?;
    let result = read(&state, id).await?;
    Ok(Json(result.order))
}

#[derive(Debug, Serialize)]
pub struct ProcessedOrders {
    pub ids: Vec<OrderId>,
}

/// GET /api/orders
pub async fn list_processed(State(state): State<AppState>) -> impl IntoResponse {
    Json(ProcessedOrders {
        ids: state.index.ids(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id(Some("42")), Some(42));
        assert_eq!(parse_id(Some(" 7 ")), Some(7));
        assert_eq!(parse_id(Some("-3")), Some(-3));
        assert_eq!(parse_id(Some("abc")), None);
        assert_eq!(parse_id(Some("")), None);
        assert_eq!(parse_id(None), None);
    }
}
