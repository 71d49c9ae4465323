//! orderflow service entry point
//!
//! Loads configuration, connects the store and cache, replays the bootstrap
//! directory, then runs the stream consumer and the HTTP server until
//! ctrl-c.

use std::sync::Arc;

use orderflow_api::state::open_cache;
use orderflow_api::telemetry::init_tracer;
use orderflow_api::{create_router, AppConfig, AppState, PgStore, ServicePipeline, SharedStore};
use orderflow_core::{OrderflowError, OrderflowResult};
use orderflow_ingest::{bootstrap_from_dir, run_consumer, InMemoryQueue, ProcessedIndex};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> OrderflowResult<()> {
    let config = AppConfig::load()?;
    init_tracer(&config.telemetry)?;

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "orderflow stopped with an error");
        return Err(e);
    }
    Ok(())
}

async fn run(config: AppConfig) -> OrderflowResult<()> {
    tracing::info!(service = %config.telemetry.service_name, "Starting orderflow");

    let pg = PgStore::connect(&config.db).await?;
    pg.ensure_schema().await?;
    let store: SharedStore = Arc::new(pg);
    let cache = open_cache(&config.cache)?;

    let pipeline: Arc<ServicePipeline> = Arc::new(
        ServicePipeline::new(store, cache, config.pipeline.pipeline_config())
            .with_index(ProcessedIndex::new()),
    );

    if let Some(dir) = &config.pipeline.bootstrap_dir {
        let summary = bootstrap_from_dir(&*pipeline, dir).await;
        tracing::info!(
            dir = %dir.display(),
            files = summary.files,
            done = summary.done,
            failed = summary.failed,
            "Bootstrap finished"
        );
    }

    let queue = InMemoryQueue::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = tokio::spawn(run_consumer(
        queue.clone(),
        Arc::clone(&pipeline),
        shutdown_rx,
    ));

    let state = AppState::new(&pipeline, queue.clone(), config.pipeline.cache_timeout());
    let app = create_router(state, &config);

    let addr = config.server.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| OrderflowError::Connection {
            backend: "http".to_string(),
            reason: format!("failed to bind {}: {}", addr, e),
        })?;
    tracing::info!(%addr, "HTTP server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    queue.close();
    match consumer.await {
        Ok(Ok((stats, reason))) => {
            tracing::info!(reason = ?reason, received = stats.received, "Consumer drained");
        }
        Ok(Err(e)) => tracing::error!(error = %e, "Consumer failed"),
        Err(e) => tracing::error!(error = %e, "Consumer task panicked"),
    }

    served.map_err(|e| OrderflowError::Connection {
        backend: "http".to_string(),
        reason: e.to_string(),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
