//! Inbound messages over HTTP.
//!
//! `POST /messages` publishes the raw body onto the inbound queue that the
//! stream consumer drains. The body is not decoded here; a malformed payload
//! is accepted and later fails in the pipeline like any stream message.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use orderflow_ingest::MessageSink;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::telemetry::metrics;

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub status: &'static str,
    pub bytes: usize,
}

/// POST /messages
pub async fn enqueue_message(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    if body.is_empty() {
        return Err(ApiError::invalid_input("Empty message body"));
    }
    let bytes = body.len();
    state.queue.publish(body.to_vec()).await?;

    if let Some(m) = metrics() {
        m.messages_enqueued_total.inc();
    }
    tracing::debug!(bytes, pending = state.queue.pending_len(), "Message enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            status: "accepted",
            bytes,
        }),
    ))
}
