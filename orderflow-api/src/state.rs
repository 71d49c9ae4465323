//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use orderflow_core::{OrderflowError, OrderflowResult};
use orderflow_ingest::{
    InMemoryQueue, IngestPipeline, OrderReadPath, PipelineMetrics, ProcessedIndex,
};
use orderflow_storage::cache::{CacheAdapter, InMemoryCache, LmdbCache, OrderCache};
use orderflow_storage::StoreAdapter;

use crate::config::{CacheBackendKind, CacheSettings};

/// Store handle shared by the pipeline and the read path.
pub type SharedStore = Arc<dyn StoreAdapter>;

/// Cache handle shared by the pipeline and the read path.
pub type SharedCache = Arc<dyn CacheAdapter>;

pub type ServicePipeline = IngestPipeline<SharedStore, SharedCache>;

pub type ServiceReadPath = OrderReadPath<SharedStore, SharedCache>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Cache-first reads with store fallback.
    pub read_path: Arc<ServiceReadPath>,
    /// Direct store access for health checks.
    pub store: SharedStore,
    /// Inbound stream; `POST /messages` publishes here.
    pub queue: InMemoryQueue,
    pub pipeline_metrics: Arc<PipelineMetrics>,
    pub index: ProcessedIndex,
    pub start_time: Instant,
}

impl AppState {
    /// Build state over the same adapters the pipeline writes through.
    pub fn new(pipeline: &ServicePipeline, queue: InMemoryQueue, cache_timeout: Duration) -> Self {
        let store = Arc::clone(pipeline.store());
        let read_path = OrderReadPath::new(Arc::clone(&store), Arc::clone(pipeline.cache()))
            .with_cache_timeout(cache_timeout);
        Self {
            read_path: Arc::new(read_path),
            store,
            queue,
            pipeline_metrics: pipeline.metrics(),
            index: pipeline.index().clone(),
            start_time: Instant::now(),
        }
    }
}

/// Open the configured cache backend behind the order projection.
///
/// An LMDB environment that cannot be opened is fatal at startup.
pub fn open_cache(settings: &CacheSettings) -> OrderflowResult<SharedCache> {
    let cache: SharedCache = match settings.backend {
        CacheBackendKind::Memory => Arc::new(OrderCache::new(InMemoryCache::new(
            settings.capacity,
            settings.ttl(),
        ))),
        CacheBackendKind::Lmdb => {
            let lmdb = LmdbCache::open(&settings.lmdb_path, settings.lmdb_max_size_mb, settings.ttl())
                .map_err(|e| OrderflowError::Connection {
                    backend: "lmdb".to_string(),
                    reason: e.to_string(),
                })?;
            Arc::new(OrderCache::new(lmdb))
        }
    };
    tracing::info!(backend = ?settings.backend, "Cache ready");
    Ok(cache)
}
