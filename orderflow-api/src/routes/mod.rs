//! HTTP router.

pub mod health;
pub mod messages;
pub mod order;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::constants::MAX_MESSAGE_BYTES;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, metrics_middleware};

/// Build the full router over `state`.
///
/// `/metrics` and the request metrics layer are only mounted when
/// `telemetry.metrics_enabled` is set.
pub fn create_router(state: AppState, config: &AppConfig) -> Router {
    let health = Router::new()
        .route("/ping", get(health::ping))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness));

    let mut router = Router::new()
        .route("/order", get(order::order_page))
        .route("/api/orders", get(order::list_processed))
        .route("/api/orders/:id", get(order::get_order))
        .route(
            "/messages",
            post(messages::enqueue_message).layer(DefaultBodyLimit::max(MAX_MESSAGE_BYTES)),
        )
        .nest("/health", health);

    if config.telemetry.metrics_enabled {
        router = router
            .route("/metrics", get(metrics_handler))
            .layer(middleware::from_fn(metrics_middleware));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.server.request_timeout())),
        )
        .with_state(state)
}
