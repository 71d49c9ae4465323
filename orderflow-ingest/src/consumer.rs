//! Stream consumer loop.
//!
//! One worker, one message at a time, so redeliveries of the same
//! `order_uid` hit the store in program order. A message is acknowledged
//! after `process` returns, whatever the outcome; malformed messages are
//! logged and skipped rather than retried forever.
//!
//! # Usage
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(run_consumer(queue.clone(), Arc::clone(&pipeline), shutdown_rx));
//!
//! // On shutdown: the in-flight message finishes, then the loop returns.
//! let _ = shutdown_tx.send(true);
//! let stats = handle.await??;
//! ```

use std::sync::Arc;

use orderflow_core::TransportError;
use orderflow_storage::cache::CacheAdapter;
use orderflow_storage::StoreAdapter;
use serde::Serialize;
use tokio::sync::watch;

use crate::pipeline::{IngestInput, IngestPipeline, StageResult};
use crate::transport::MessageSource;

/// Totals for one run of the consumer loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub done: u64,
    pub failed: u64,
    pub replays: u64,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Shutdown,
    SourceClosed,
}

/// Run until shutdown is signalled or the source is closed and drained.
///
/// Transport errors (receive or ack) are fatal to the loop and returned;
/// per-message processing failures never are.
pub async fn run_consumer<M, S, C>(
    source: M,
    pipeline: Arc<IngestPipeline<S, C>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(ConsumerStats, StopReason), TransportError>
where
    M: MessageSource,
    S: StoreAdapter,
    C: CacheAdapter,
{
    let mut stats = ConsumerStats::default();
    tracing::info!("Stream consumer started");

    let reason = loop {
        if *shutdown_rx.borrow() {
            break StopReason::Shutdown;
        }

        let received = tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                // A dropped sender means nobody can stop us any more; treat as shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    break StopReason::Shutdown;
                }
                continue;
            }

            received = source.recv() => received?,
        };

        let Some(message) = received else {
            break StopReason::SourceClosed;
        };
        stats.received += 1;

        // Not raced against shutdown: the in-flight transaction always finishes.
        let report = pipeline.process(IngestInput::message(message.payload)).await;
        match &report.outcome {
            StageResult::Done { write, .. } => {
                stats.done += 1;
                if write.is_replay() {
                    stats.replays += 1;
                }
            }
            StageResult::Failed { stage, error } => {
                stats.failed += 1;
                tracing::debug!(tag = message.tag, stage = ?stage, error = %error, "Skipping failed message");
            }
        }

        source.ack(message.tag).await?;
        stats.acked += 1;
    };

    tracing::info!(
        reason = ?reason,
        received = stats.received,
        done = stats.done,
        failed = stats.failed,
        replays = stats.replays,
        "Stream consumer stopped"
    );
    Ok((stats, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::transport::{InMemoryQueue, MessageSink};
    use orderflow_storage::MockStore;
    use orderflow_test_utils::fixtures::{garbage_payload, sample_payload};
    use orderflow_test_utils::RecordingCache;
    use std::time::Duration;

    fn pipeline(store: &Arc<MockStore>) -> Arc<IngestPipeline<Arc<MockStore>, RecordingCache>> {
        Arc::new(IngestPipeline::new(
            Arc::clone(store),
            RecordingCache::new(),
            PipelineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_consumes_until_closed() {
        let store = MockStore::shared();
        let queue = InMemoryQueue::new();
        queue.publish(sample_payload("a")).await.expect("publish");
        queue.publish(garbage_payload()).await.expect("publish");
        queue.publish(sample_payload("b")).await.expect("publish");
        queue.close();

        let (_tx, rx) = watch::channel(false);
        let (stats, reason) = run_consumer(queue.clone(), pipeline(&store), rx)
            .await
            .expect("consumer");

        assert_eq!(reason, StopReason::SourceClosed);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.done, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.acked, 3, "failed messages are acked too");
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(store.order_count(), 2);
    }

    #[tokio::test]
    async fn test_redelivery_after_requeue_is_harmless() {
        let store = MockStore::shared();
        let queue = InMemoryQueue::new();
        queue.publish(sample_payload("dup")).await.expect("publish");

        // First consumer "crashes" after receiving without acking.
        let msg = queue.recv().await.expect("recv").expect("message");
        let pipe = pipeline(&store);
        pipe.process(IngestInput::message(msg.payload)).await;
        assert_eq!(queue.requeue_unacked(), 1);
        queue.close();

        let (_tx, rx) = watch::channel(false);
        let (stats, _) = run_consumer(queue, Arc::clone(&pipe), rx)
            .await
            .expect("consumer");
        assert_eq!(stats.replays, 1);
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_waiting_loop() {
        let store = MockStore::shared();
        let queue = InMemoryQueue::new();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_consumer(queue.clone(), pipeline(&store), rx));

        queue.publish(sample_payload("one")).await.expect("publish");
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).expect("signal");

        let (stats, reason) = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .expect("task")
            .expect("consumer");
        assert_eq!(reason, StopReason::Shutdown);
        assert_eq!(stats.done, 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_message_finishes_on_shutdown() {
        let store = MockStore::shared();
        store.set_write_delay(Some(Duration::from_millis(100)));
        let queue = InMemoryQueue::new();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_consumer(queue.clone(), pipeline(&store), rx));

        queue.publish(sample_payload("slow")).await.expect("publish");
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).expect("signal");

        let (stats, _) = handle.await.expect("task").expect("consumer");
        assert_eq!(stats.done, 1);
        assert_eq!(stats.acked, 1);
        assert_eq!(store.order_count(), 1);
    }
}
