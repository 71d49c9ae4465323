//! Cache-aside read path.
//!
//! Cache first; on a miss (or an entry that no longer decodes) fall back to
//! the store and repopulate the cache. The store answers `NotFound` for ids
//! that exist nowhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use orderflow_core::{CacheError, Order, OrderId, OrderflowResult};
use orderflow_storage::cache::CacheAdapter;
use orderflow_storage::StoreAdapter;
use serde::Serialize;

const DEFAULT_READ_CACHE_TIMEOUT_MS: u64 = 500;

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadSource {
    Cache,
    Store,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadSource::Cache => "cache",
            ReadSource::Store => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub order: Order,
    pub source: ReadSource,
}

/// Counters for read-path activity.
#[derive(Debug, Default)]
pub struct ReadMetrics {
    pub cache_hits: AtomicU64,
    pub store_fallbacks: AtomicU64,
    pub corrupt_entries: AtomicU64,
    pub repopulate_failures: AtomicU64,
}

/// Read-only view over the shared adapters.
pub struct OrderReadPath<S, C> {
    store: S,
    cache: C,
    cache_timeout: Duration,
    metrics: ReadMetrics,
}

impl<S, C> OrderReadPath<S, C>
where
    S: StoreAdapter,
    C: CacheAdapter,
{
    pub fn new(store: S, cache: C) -> Self {
        Self {
            store,
            cache,
            cache_timeout: Duration::from_millis(DEFAULT_READ_CACHE_TIMEOUT_MS),
            metrics: ReadMetrics::default(),
        }
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn metrics(&self) -> &ReadMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn get(&self, id: OrderId) -> OrderflowResult<ReadResult> {
        match tokio::time::timeout(self.cache_timeout, self.cache.get_order(id)).await {
            Ok(Ok(order)) => {
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(ReadResult {
                    order,
                    source: ReadSource::Cache,
                });
            }
            Ok(Err(CacheError::Miss { .. })) => {
                tracing::debug!(order_id = id, "Cache miss");
            }
            Ok(Err(e @ CacheError::Corrupt { .. })) => {
                self.metrics.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(order_id = id, error = %e, "Corrupt cache entry; reading from store");
            }
            Ok(Err(e)) => {
                tracing::warn!(order_id = id, error = %e, "Cache read failed; reading from store");
            }
            Err(_) => {
                tracing::warn!(order_id = id, "Cache read timed out; reading from store");
            }
        }

        let order = self.store.read_order(id).await?;
        self.metrics.store_fallbacks.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.cache_timeout, self.cache.put(&order)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.repopulate_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(order_id = id, error = %e, "Failed to repopulate cache");
            }
            Err(_) => {
                self.metrics.repopulate_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(order_id = id, "Cache repopulation timed out");
            }
        }

        Ok(ReadResult {
            order,
            source: ReadSource::Store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::EntityType;
    use orderflow_storage::cache::{CacheBackend, CacheKey, InMemoryCache, OrderCache};
    use orderflow_storage::MockStore;
    use orderflow_test_utils::assertions::assert_not_found;
    use orderflow_test_utils::fixtures::sample_order;
    use orderflow_test_utils::FailingCache;
    use std::sync::Arc;

    async fn stored(store: &MockStore) -> Order {
        let mut order = sample_order();
        store.write_order(&mut order).await.expect("write");
        order
    }

    #[tokio::test]
    async fn test_miss_falls_back_and_repopulates() {
        let store = MockStore::shared();
        let order = stored(&store).await;
        let cache = Arc::new(OrderCache::new(InMemoryCache::default()));
        let read_path = OrderReadPath::new(Arc::clone(&store), Arc::clone(&cache));

        let first = read_path.get(order.id).await.expect("read");
        assert_eq!(first.source, ReadSource::Store);
        assert_eq!(first.order, order);

        let second = read_path.get(order.id).await.expect("read");
        assert_eq!(second.source, ReadSource::Cache);
        assert_eq!(second.order, order);
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test]
    async fn test_out_of_band_delete_recovers() {
        let store = MockStore::shared();
        let order = stored(&store).await;
        let cache = Arc::new(OrderCache::new(InMemoryCache::default()));
        cache.put(&order).await.expect("prime");
        let read_path = OrderReadPath::new(Arc::clone(&store), Arc::clone(&cache));

        cache.invalidate(order.id).await.expect("invalidate");
        let result = read_path.get(order.id).await.expect("read");
        assert_eq!(result.source, ReadSource::Store);
        assert!(cache.get(order.id).await.is_ok(), "cache repopulated");
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_overwritten() {
        let store = MockStore::shared();
        let order = stored(&store).await;
        let cache = Arc::new(OrderCache::new(InMemoryCache::default()));
        cache
            .backend()
            .set(&CacheKey::Order(order.id), b"{broken")
            .await
            .expect("set");
        let read_path = OrderReadPath::new(Arc::clone(&store), Arc::clone(&cache));

        let result = read_path.get(order.id).await.expect("read");
        assert_eq!(result.source, ReadSource::Store);
        assert_eq!(read_path.metrics().corrupt_entries.load(Ordering::Relaxed), 1);
        assert_eq!(cache.get_order(order.id).await.expect("fixed"), order);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = MockStore::shared();
        let read_path = OrderReadPath::new(store, Arc::new(OrderCache::new(InMemoryCache::default())));
        let result = read_path.get(999).await;
        assert_not_found(&result, EntityType::Order);
    }

    #[tokio::test]
    async fn test_broken_cache_still_serves_from_store() {
        let store = MockStore::shared();
        let order = stored(&store).await;
        let read_path = OrderReadPath::new(Arc::clone(&store), FailingCache::unavailable());

        let result = read_path.get(order.id).await.expect("read");
        assert_eq!(result.source, ReadSource::Store);
        assert_eq!(
            read_path.metrics().repopulate_failures.load(Ordering::Relaxed),
            1
        );
    }
}
