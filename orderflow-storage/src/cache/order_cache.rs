//! Order-level cache over any [`CacheBackend`].

use async_trait::async_trait;
use orderflow_core::{CacheError, Order, OrderId};

use super::keys::CacheKey;
use super::traits::{CacheAdapter, CacheBackend, CacheResult, CacheStats};

/// Writes an order blob plus its denormalized fragments:
///
/// | key | value |
/// |-----|-------|
/// | `order:<id>` | order JSON |
/// | `delivery:<delivery_id>` | recipient name |
/// | `payment:<payment_id>` | transaction reference |
/// | `item:<item_id>` | chrt_id, decimal |
pub struct OrderCache<B> {
    backend: B,
}

impl<B: CacheBackend> OrderCache<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read a fragment as a string.
    pub async fn fragment(&self, key: &CacheKey) -> CacheResult<String> {
        let bytes = self.backend.get(key).await?;
        String::from_utf8(bytes).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        self.backend.stats().await
    }
}

fn fragments(order: &Order) -> Vec<(CacheKey, Vec<u8>)> {
    let mut out = Vec::with_capacity(2 + order.items.len());
    out.push((
        CacheKey::Delivery(order.delivery.id),
        order.delivery.name.clone().into_bytes(),
    ));
    out.push((
        CacheKey::Payment(order.payment.id),
        order.payment.transaction.clone().into_bytes(),
    ));
    for item in &order.items {
        out.push((CacheKey::Item(item.id), item.chrt_id.to_string().into_bytes()));
    }
    out
}

#[async_trait]
impl<B: CacheBackend> CacheAdapter for OrderCache<B> {
    async fn put(&self, order: &Order) -> CacheResult<()> {
        let blob = order.to_json_bytes().map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let order_key = CacheKey::Order(order.id);
        let blob_result = self.backend.set(&order_key, &blob).await;

        let mut failed_keys = Vec::new();
        for (key, value) in fragments(order) {
            if let Err(e) = self.backend.set(&key, &value).await {
                tracing::debug!(key = %key, error = %e, "cache fragment write failed");
                failed_keys.push(key.to_string());
            }
        }

        if let Err(e) = blob_result {
            return Err(CacheError::Backend {
                reason: format!("{order_key}: {e}"),
            });
        }
        if failed_keys.is_empty() {
            Ok(())
        } else {
            Err(CacheError::PartialWrite { failed_keys })
        }
    }

    async fn get(&self, id: OrderId) -> CacheResult<Vec<u8>> {
        self.backend.get(&CacheKey::Order(id)).await
    }

    async fn invalidate(&self, id: OrderId) -> CacheResult<()> {
        self.backend.delete(&CacheKey::Order(id)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use orderflow_core::{Delivery, Item, Payment};
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn stored_order() -> Order {
        Order {
            id: 12,
            order_uid: "test-uid-1".into(),
            track_number: "TRK1".into(),
            entry: "WBIL".into(),
            delivery: Delivery {
                id: 3,
                name: "Jane Doe".into(),
                ..Default::default()
            },
            payment: Payment {
                id: 4,
                transaction: "tx-1".into(),
                amount: 500,
                ..Default::default()
            },
            items: vec![Item {
                id: 5,
                chrt_id: 999,
                track_number: "TRK1".into(),
                price: 100,
                ..Default::default()
            }],
            locale: "en".into(),
            internal_signature: String::new(),
            customer_id: "c".into(),
            delivery_service: "meest".into(),
            shardkey: "9".into(),
            sm_id: 99,
            date_created: "2021-11-26T06:22:19Z".into(),
            oof_shard: "1".into(),
        }
    }

    /// Backend that refuses writes to chosen keys.
    struct RejectingBackend {
        inner: InMemoryCache,
        reject: Mutex<HashSet<CacheKey>>,
    }

    #[async_trait]
    impl CacheBackend for RejectingBackend {
        async fn set(&self, key: &CacheKey, value: &[u8]) -> CacheResult<()> {
            let rejected = self.reject.lock().map(|r| r.contains(key)).unwrap_or(false);
            if rejected {
                return Err(CacheError::Backend {
                    reason: "rejected".into(),
                });
            }
            self.inner.set(key, value).await
        }

        async fn get(&self, key: &CacheKey) -> CacheResult<Vec<u8>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
            self.inner.delete(key).await
        }

        async fn stats(&self) -> CacheResult<CacheStats> {
            self.inner.stats().await
        }
    }

    fn rejecting(keys: &[CacheKey]) -> OrderCache<RejectingBackend> {
        OrderCache::new(RejectingBackend {
            inner: InMemoryCache::default(),
            reject: Mutex::new(keys.iter().copied().collect()),
        })
    }

    #[tokio::test]
    async fn test_put_writes_blob_and_fragments() {
        let cache = OrderCache::new(InMemoryCache::default());
        let order = stored_order();
        cache.put(&order).await.expect("put should succeed");

        let back = cache.get_order(12).await.expect("order hit");
        assert_eq!(back, order);
        assert_eq!(
            cache.fragment(&CacheKey::Delivery(3)).await.expect("delivery"),
            "Jane Doe"
        );
        assert_eq!(
            cache.fragment(&CacheKey::Payment(4)).await.expect("payment"),
            "tx-1"
        );
        assert_eq!(cache.fragment(&CacheKey::Item(5)).await.expect("item"), "999");
    }

    #[tokio::test]
    async fn test_fragment_failure_is_partial_write() {
        let cache = rejecting(&[CacheKey::Delivery(3)]);
        let order = stored_order();
        let err = cache.put(&order).await.unwrap_err();

        assert_eq!(
            err,
            CacheError::PartialWrite {
                failed_keys: vec!["delivery:3".to_string()]
            }
        );
        // Every other write still went through.
        assert!(cache.get(12).await.is_ok());
        assert!(cache.fragment(&CacheKey::Item(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_blob_failure_is_backend_error() {
        let cache = rejecting(&[CacheKey::Order(12)]);
        let err = cache.put(&stored_order()).await.unwrap_err();
        assert!(matches!(err, CacheError::Backend { .. }));
        assert!(cache.fragment(&CacheKey::Payment(4)).await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_blob() {
        let cache = OrderCache::new(InMemoryCache::default());
        cache
            .backend()
            .set(&CacheKey::Order(1), b"not json")
            .await
            .expect("set");
        let err = cache.get_order(1).await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = OrderCache::new(InMemoryCache::default());
        cache.put(&stored_order()).await.expect("put");
        cache.invalidate(12).await.expect("invalidate");
        assert!(cache.get(12).await.unwrap_err().is_miss());
    }
}
