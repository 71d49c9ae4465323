//! Publish a stored order to a running orderflow service.
//!
//! Usage: publish-order [order-id] [target-url]
//!
//! Reads the order from the configured database and POSTs its wire encoding
//! to `<target-url>/messages`. Defaults: order 1, `http://localhost:<port>`.

use std::time::Duration;

use orderflow_api::telemetry::init_tracer;
use orderflow_api::{AppConfig, HttpSink, PgStore};
use orderflow_core::{ConfigError, OrderId, OrderflowResult};
use orderflow_ingest::republish_order;

const DEFAULT_ORDER_ID: OrderId = 1;
const PUBLISH_TIMEOUT_SECS: u64 = 10;

#[tokio::main]
async fn main() -> OrderflowResult<()> {
    let config = AppConfig::load()?;
    init_tracer(&config.telemetry)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let id = match args.first() {
        Some(raw) => raw.parse::<OrderId>().map_err(|e| ConfigError::InvalidValue {
            field: "order-id".to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })?,
        None => DEFAULT_ORDER_ID,
    };
    let target = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| format!("http://localhost:{}", config.server.port));

    let store = PgStore::connect(&config.db).await?;
    let sink = HttpSink::new(&target, Duration::from_secs(PUBLISH_TIMEOUT_SECS))?;

    match republish_order(&store, &sink, id).await {
        Ok(order) => {
            tracing::info!(order_id = id, order_uid = %order.order_uid, target = %sink.endpoint(), "Order published");
            Ok(())
        }
        Err(e) => {
            tracing::error!(order_id = id, target = %sink.endpoint(), error = %e, "Publish failed");
            Err(e)
        }
    }
}
