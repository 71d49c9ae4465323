//! The ingestion pipeline.
//!
//! Every input, whether a stream message or a bootstrap file, goes through
//! [`IngestPipeline::process`]:
//!
//! 1. decode; a bad payload ends in `Failed` with no side effects
//! 2. durable write through the store adapter, bounded by `store_timeout`;
//!    failure ends in `Failed` and the transaction is rolled back
//! 3. best-effort projection into the cache, bounded by `cache_timeout`;
//!    failure is recorded as an advisory and processing still ends in `Done`
//! 4. the internal id is recorded in the processed index

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orderflow_core::{decode, CacheError, Order, OrderId, OrderflowError, StorageError};
use orderflow_storage::cache::CacheAdapter;
use orderflow_storage::{StoreAdapter, WriteOutcome};
use serde::Serialize;

use crate::index::ProcessedIndex;
use crate::state::{ProcessState, StateTracker};

const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CACHE_TIMEOUT_MS: u64 = 1_000;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Timeouts for the two blocking stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on the transactional store write (default: 5 seconds)
    pub store_timeout: Duration,
    /// Upper bound on the cache projection (default: 1 second)
    pub cache_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            cache_timeout: Duration::from_millis(DEFAULT_CACHE_TIMEOUT_MS),
        }
    }
}

// ============================================================================
// INPUTS AND REPORTS
// ============================================================================

/// One unit of work for the pipeline.
#[derive(Debug, Clone)]
pub enum IngestInput {
    /// Payload of a stream message.
    Message { payload: Vec<u8> },
    /// Contents of a bootstrap file.
    File { path: PathBuf, payload: Vec<u8> },
}

impl IngestInput {
    pub fn message(payload: impl Into<Vec<u8>>) -> Self {
        IngestInput::Message {
            payload: payload.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, payload: impl Into<Vec<u8>>) -> Self {
        IngestInput::File {
            path: path.into(),
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            IngestInput::Message { payload } | IngestInput::File { payload, .. } => payload,
        }
    }

    /// Human-readable origin for logs and reports.
    pub fn source(&self) -> String {
        match self {
            IngestInput::Message { .. } => "stream".to_string(),
            IngestInput::File { path, .. } => path.display().to_string(),
        }
    }
}

/// Stage at which a failed input stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailedStage {
    Decode,
    Store,
}

/// Outcome of one input, separating fatal errors from advisory ones.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// Durably written. `advisory` carries a cache failure, if any.
    Done {
        write: WriteOutcome,
        advisory: Option<CacheError>,
    },
    /// Nothing was persisted.
    Failed {
        stage: FailedStage,
        error: OrderflowError,
    },
}

/// Everything the pipeline knows about one processed input.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub source: String,
    pub order_uid: Option<String>,
    pub order_id: Option<OrderId>,
    pub history: Vec<ProcessState>,
    pub outcome: StageResult,
}

impl ProcessReport {
    pub fn state(&self) -> ProcessState {
        self.history
            .last()
            .copied()
            .unwrap_or(ProcessState::Decoded)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.outcome, StageResult::Done { .. })
    }

    pub fn is_replay(&self) -> bool {
        matches!(&self.outcome, StageResult::Done { write, .. } if write.is_replay())
    }

    pub fn advisory(&self) -> Option<&CacheError> {
        match &self.outcome {
            StageResult::Done { advisory, .. } => advisory.as_ref(),
            StageResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&OrderflowError> {
        match &self.outcome {
            StageResult::Failed { error, .. } => Some(error),
            StageResult::Done { .. } => None,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for pipeline activity since startup.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Inputs handed to `process`
    pub received: AtomicU64,
    /// Inputs that ended in `Done`
    pub done: AtomicU64,
    /// Inputs rejected by the decoder
    pub failed_decode: AtomicU64,
    /// Inputs whose store write failed or timed out
    pub failed_store: AtomicU64,
    /// Done inputs whose cache projection failed
    pub cache_advisories: AtomicU64,
    /// Done inputs whose `order_uid` already existed
    pub replays: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            received: self.received.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed_decode: self.failed_decode.load(Ordering::Relaxed),
            failed_store: self.failed_store.load(Ordering::Relaxed),
            cache_advisories: self.cache_advisories.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub received: u64,
    pub done: u64,
    pub failed_decode: u64,
    pub failed_store: u64,
    pub cache_advisories: u64,
    pub replays: u64,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Owns the adapters, the processed index and the metrics for one service.
pub struct IngestPipeline<S, C> {
    store: S,
    cache: C,
    config: PipelineConfig,
    index: ProcessedIndex,
    metrics: Arc<PipelineMetrics>,
}

impl<S, C> IngestPipeline<S, C>
where
    S: StoreAdapter,
    C: CacheAdapter,
{
    pub fn new(store: S, cache: C, config: PipelineConfig) -> Self {
        Self {
            store,
            cache,
            config,
            index: ProcessedIndex::new(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Share an index created elsewhere (e.g. exposed by the HTTP layer).
    pub fn with_index(mut self, index: ProcessedIndex) -> Self {
        self.index = index;
        self
    }

    pub fn index(&self) -> &ProcessedIndex {
        &self.index
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Process one input to a terminal state. Never panics on bad input and
    /// never returns early without a report.
    pub async fn process(&self, input: IngestInput) -> ProcessReport {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        let source = input.source();
        let mut tracker = StateTracker::new();

        let mut order = match decode(input.payload()) {
            Ok(order) => order,
            Err(e) => {
                tracker.advance(ProcessState::Failed);
                self.metrics.failed_decode.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(source = %source, error = %e, "Rejected undecodable order payload");
                return ProcessReport {
                    source,
                    order_uid: None,
                    order_id: None,
                    history: tracker.into_history(),
                    outcome: StageResult::Failed {
                        stage: FailedStage::Decode,
                        error: e.into(),
                    },
                };
            }
        };
        let order_uid = order.order_uid.clone();

        tracker.advance(ProcessState::StorePending);
        let write = match self.durable_write(&mut order).await {
            Ok(write) => write,
            Err(e) => {
                tracker.advance(ProcessState::Failed);
                self.metrics.failed_store.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    source = %source,
                    order_uid = %order_uid,
                    error = %e,
                    "Order write failed; transaction rolled back"
                );
                return ProcessReport {
                    source,
                    order_uid: Some(order_uid),
                    order_id: None,
                    history: tracker.into_history(),
                    outcome: StageResult::Failed {
                        stage: FailedStage::Store,
                        error: e.into(),
                    },
                };
            }
        };
        tracker.advance(ProcessState::StoreCommitted);
        let order_id = write.order_id();

        if write.is_replay() {
            self.metrics.replays.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                order_uid = %order_uid,
                order_id,
                "Order already stored; replay is a no-op"
            );
        } else {
            tracing::info!(
                source = %source,
                order_uid = %order_uid,
                order_id,
                items = write.item_ids.len(),
                "Order stored"
            );
        }

        tracker.advance(ProcessState::CachePending);
        let advisory = self.project(order_id).await;
        if let Some(e) = &advisory {
            self.metrics.cache_advisories.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                order_uid = %order_uid,
                order_id,
                error = %e,
                "Cache projection failed; order will be cached on first read"
            );
        }

        self.index.record(order_id, &order_uid);
        tracker.advance(ProcessState::Done);
        self.metrics.done.fetch_add(1, Ordering::Relaxed);

        ProcessReport {
            source,
            order_uid: Some(order_uid),
            order_id: Some(order_id),
            history: tracker.into_history(),
            outcome: StageResult::Done { write, advisory },
        }
    }

    async fn durable_write(&self, order: &mut Order) -> Result<WriteOutcome, StorageError> {
        let timeout = self.config.store_timeout;
        match tokio::time::timeout(timeout, self.store.write_order(order)).await {
            Ok(result) => result,
            // Dropping the write future drops its transaction, which rolls back.
            Err(_) => Err(StorageError::Timeout {
                operation: "write_order".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Put the committed order into the cache.
    ///
    /// The stored row is read back rather than caching the decoded payload:
    /// shared delivery, payment and item rows keep whatever was stored first,
    /// and repeated items collapse to one row.
    async fn project(&self, order_id: OrderId) -> Option<CacheError> {
        let timeout = self.config.cache_timeout;
        let timed_out = || CacheError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        };

        let stored = match tokio::time::timeout(
            self.config.store_timeout,
            self.store.read_order(order_id),
        )
        .await
        {
            Ok(Ok(order)) => order,
            Ok(Err(e)) => {
                return Some(CacheError::Backend {
                    reason: format!("could not read stored order for cache: {e}"),
                })
            }
            Err(_) => return Some(timed_out()),
        };

        match tokio::time::timeout(timeout, self.cache.put(&stored)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(timed_out()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_storage::cache::{InMemoryCache, OrderCache};
    use orderflow_storage::{MockStore, StoreFault, StoreStep};
    use orderflow_test_utils::fixtures::{
        garbage_payload, payload_without_uid, sample_order_with_uid, sample_payload,
    };
    use orderflow_test_utils::{FailingCache, RecordingCache, SlowCache};

    type TestPipeline<C> = IngestPipeline<Arc<MockStore>, C>;

    fn pipeline() -> (TestPipeline<Arc<OrderCache<InMemoryCache>>>, Arc<MockStore>, Arc<OrderCache<InMemoryCache>>) {
        let store = MockStore::shared();
        let cache = Arc::new(OrderCache::new(InMemoryCache::default()));
        let pipeline = IngestPipeline::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            PipelineConfig::default(),
        );
        (pipeline, store, cache)
    }

    #[tokio::test]
    async fn test_process_happy_path() {
        let (pipeline, store, cache) = pipeline();
        let report = pipeline
            .process(IngestInput::message(sample_payload("test-uid-1")))
            .await;

        assert!(report.is_done(), "unexpected outcome: {:?}", report.outcome);
        assert_eq!(
            report.history,
            vec![
                ProcessState::Decoded,
                ProcessState::StorePending,
                ProcessState::StoreCommitted,
                ProcessState::CachePending,
                ProcessState::Done,
            ]
        );
        let id = report.order_id.expect("order id");
        assert_eq!(store.order_count(), 1);

        let cached = cache.get_order(id).await.expect("cache hit");
        let stored = store.read_order(id).await.expect("stored");
        assert_eq!(cached, stored);
        assert_eq!(cached.delivery.name, "Jane Doe");
        assert!(pipeline.index().contains(id));
    }

    #[tokio::test]
    async fn test_garbage_fails_without_side_effects() {
        let (pipeline, store, _cache) = pipeline();
        for payload in [garbage_payload(), payload_without_uid()] {
            let report = pipeline.process(IngestInput::message(payload)).await;
            assert_eq!(report.state(), ProcessState::Failed);
            assert_eq!(report.history, vec![ProcessState::Decoded, ProcessState::Failed]);
            assert!(matches!(
                report.outcome,
                StageResult::Failed {
                    stage: FailedStage::Decode,
                    ..
                }
            ));
        }
        assert_eq!(store.order_count(), 0);
        assert_eq!(store.commits() + store.rollbacks(), 0);
        assert!(pipeline.index().is_empty());
        assert_eq!(pipeline.metrics().snapshot().failed_decode, 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_failed_and_cache_untouched() {
        let store = MockStore::shared();
        store.set_fault(Some(StoreFault::FailOn(StoreStep::Item)));
        let cache = Arc::new(RecordingCache::new());
        let pipeline = IngestPipeline::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            PipelineConfig::default(),
        );

        let report = pipeline
            .process(IngestInput::message(sample_payload("x")))
            .await;
        assert!(matches!(
            report.outcome,
            StageResult::Failed {
                stage: FailedStage::Store,
                ..
            }
        ));
        assert_eq!(report.order_uid.as_deref(), Some("x"));
        assert!(cache.puts().is_empty());
        assert_eq!(store.delivery_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_failure_is_advisory() {
        let store = MockStore::shared();
        let pipeline = IngestPipeline::new(
            Arc::clone(&store),
            FailingCache::unavailable(),
            PipelineConfig::default(),
        );

        let report = pipeline
            .process(IngestInput::message(sample_payload("adv")))
            .await;
        assert!(report.is_done());
        assert!(matches!(report.advisory(), Some(CacheError::Backend { .. })));
        assert_eq!(store.order_count(), 1);
        assert_eq!(pipeline.metrics().snapshot().cache_advisories, 1);
    }

    #[tokio::test]
    async fn test_store_timeout_fails() {
        let store = MockStore::shared();
        store.set_write_delay(Some(Duration::from_millis(200)));
        let pipeline = IngestPipeline::new(
            Arc::clone(&store),
            RecordingCache::new(),
            PipelineConfig {
                store_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let report = pipeline
            .process(IngestInput::message(sample_payload("slow")))
            .await;
        assert!(matches!(
            report.error(),
            Some(OrderflowError::Storage(StorageError::Timeout { .. }))
        ));
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_timeout_is_advisory() {
        let store = MockStore::shared();
        let pipeline = IngestPipeline::new(
            Arc::clone(&store),
            SlowCache::new(RecordingCache::new(), Duration::from_millis(200)),
            PipelineConfig {
                cache_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let report = pipeline
            .process(IngestInput::message(sample_payload("slow-cache")))
            .await;
        assert!(report.is_done());
        assert!(matches!(report.advisory(), Some(CacheError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_redelivery_is_replay_and_caches_stored_row() {
        let (pipeline, store, cache) = pipeline();
        let first = pipeline
            .process(IngestInput::message(sample_payload("dup")))
            .await;

        // Same order_uid, different content.
        let mut changed = sample_order_with_uid("dup");
        changed.customer_id = "someone-else".to_string();
        let payload = changed.to_json_bytes().expect("encode");
        let second = pipeline.process(IngestInput::message(payload)).await;

        assert!(second.is_replay());
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(store.order_count(), 1);

        let id = second.order_id.expect("id");
        let cached = cache.get_order(id).await.expect("hit");
        assert_eq!(cached.customer_id, "test");
        assert_eq!(pipeline.metrics().snapshot().replays, 1);
    }

    #[tokio::test]
    async fn test_shared_payment_caches_stored_fields() {
        let (pipeline, store, cache) = pipeline();
        pipeline
            .process(IngestInput::message(sample_payload("a")))
            .await;

        // Same payment identity as "a", but a different bank.
        let mut second = sample_order_with_uid("b");
        second.payment.bank = "other-bank".to_string();
        let report = pipeline
            .process(IngestInput::message(second.to_json_bytes().expect("encode")))
            .await;
        assert!(report.is_done());
        assert!(!report.is_replay());

        let id = report.order_id.expect("id");
        let cached = cache.get_order(id).await.expect("hit");
        let stored = store.read_order(id).await.expect("stored");
        assert_eq!(cached, stored);
        assert_eq!(cached.payment.bank, "alpha");
    }

    #[tokio::test]
    async fn test_repeated_item_caches_single_row() {
        let (pipeline, store, cache) = pipeline();
        let mut order = sample_order_with_uid("twice");
        order.track_number = "TRK-TWICE".to_string();
        order.items[0].track_number = "TRK-TWICE".to_string();
        order.items.push(order.items[0].clone());

        let report = pipeline
            .process(IngestInput::message(order.to_json_bytes().expect("encode")))
            .await;
        assert!(report.is_done());

        let id = report.order_id.expect("id");
        let cached = cache.get_order(id).await.expect("hit");
        let stored = store.read_order(id).await.expect("stored");
        assert_eq!(cached, stored);
        assert_eq!(cached.items.len(), 1);
    }

    #[tokio::test]
    async fn test_file_input_source() {
        let (pipeline, _store, _cache) = pipeline();
        let report = pipeline
            .process(IngestInput::file("materials/model.json", sample_payload("f")))
            .await;
        assert_eq!(report.source, "materials/model.json");
        assert!(report.is_done());
    }
}
