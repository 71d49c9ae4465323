//! End-to-end flow over the in-memory adapters: bootstrap, stream
//! redelivery, and read-path recovery after cache loss.

use std::sync::Arc;

use orderflow_ingest::{
    bootstrap_from_dir, run_consumer, InMemoryQueue, IngestPipeline, MessageSink,
    OrderReadPath, PipelineConfig, ReadSource, StopReason,
};
use orderflow_storage::cache::{CacheAdapter, InMemoryCache, OrderCache};
use orderflow_storage::{MockStore, StoreAdapter};
use orderflow_test_utils::fixtures::{garbage_payload, sample_payload};
use tempfile::TempDir;
use tokio::sync::watch;

type Cache = Arc<OrderCache<InMemoryCache>>;

fn setup() -> (Arc<MockStore>, Cache, Arc<IngestPipeline<Arc<MockStore>, Cache>>) {
    let store = MockStore::shared();
    let cache = Arc::new(OrderCache::new(InMemoryCache::default()));
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        PipelineConfig::default(),
    ));
    (store, cache, pipeline)
}

#[tokio::test]
async fn bootstrap_then_duplicate_stream_message_then_read() {
    let (store, cache, pipeline) = setup();

    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join("model.json"), sample_payload("test-uid-1")).expect("write");
    let summary = bootstrap_from_dir(&pipeline, dir.path()).await;
    assert_eq!(summary.done, 1);
    let id = summary.reports[0].order_id.expect("order id");

    let queue = InMemoryQueue::new();
    queue.publish(sample_payload("test-uid-1")).await.expect("publish");
    queue.publish(garbage_payload()).await.expect("publish");
    queue.close();

    let (_tx, rx) = watch::channel(false);
    let (stats, reason) = run_consumer(queue, Arc::clone(&pipeline), rx)
        .await
        .expect("consumer");
    assert_eq!(reason, StopReason::SourceClosed);
    assert_eq!(stats.replays, 1);
    assert_eq!(stats.failed, 1);

    // One row per entity despite the redelivery.
    assert_eq!(store.order_count(), 1);
    assert_eq!(store.item_count(), 1);
    assert_eq!(store.find_order_id("test-uid-1").await.expect("find"), Some(id));
    assert_eq!(pipeline.index().ids(), vec![id]);

    let read_path = OrderReadPath::new(Arc::clone(&store), Arc::clone(&cache));
    let hit = read_path.get(id).await.expect("read");
    assert_eq!(hit.source, ReadSource::Cache);
    assert_eq!(hit.order.order_uid, "test-uid-1");

    // Out-of-band cache loss: the read path recovers from the store.
    cache.invalidate(id).await.expect("invalidate");
    assert!(cache.get(id).await.expect_err("evicted").is_miss());
    let miss = read_path.get(id).await.expect("read");
    assert_eq!(miss.source, ReadSource::Store);
    assert_eq!(miss.order, hit.order);

    let again = read_path.get(id).await.expect("read");
    assert_eq!(again.source, ReadSource::Cache);
}
