//! Cache backend and adapter traits.
//!
//! [`CacheBackend`] is the raw bytes-in/bytes-out store (in-memory, LMDB).
//! [`CacheAdapter`] is what the pipeline and read path see: whole orders
//! keyed by internal id.

use std::sync::Arc;

use async_trait::async_trait;
use orderflow_core::{CacheError, Order, OrderId};

use super::keys::CacheKey;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Pluggable byte store.
///
/// Any entry may vanish at any time (eviction, expiry, restart). `get`
/// returns `CacheError::Miss` for absent or expired entries.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn set(&self, key: &CacheKey, value: &[u8]) -> CacheResult<()>;

    async fn get(&self, key: &CacheKey) -> CacheResult<Vec<u8>>;

    /// Remove an entry. Returns whether something was removed.
    async fn delete(&self, key: &CacheKey) -> CacheResult<bool>;

    async fn stats(&self) -> CacheResult<CacheStats>;
}

#[async_trait]
impl<T: CacheBackend + ?Sized> CacheBackend for Arc<T> {
    async fn set(&self, key: &CacheKey, value: &[u8]) -> CacheResult<()> {
        (**self).set(key, value).await
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Vec<u8>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        (**self).delete(key).await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        (**self).stats().await
    }
}

/// Order-level cache contract.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Store the order blob and its fragments. Best-effort; partial failure
    /// is reported, never rolled back.
    async fn put(&self, order: &Order) -> CacheResult<()>;

    /// Raw serialized order.
    async fn get(&self, id: OrderId) -> CacheResult<Vec<u8>>;

    /// Deserialized order. An undecodable blob is `CacheError::Corrupt`.
    async fn get_order(&self, id: OrderId) -> CacheResult<Order> {
        let bytes = self.get(id).await?;
        Order::from_json_bytes(&bytes).map_err(|e| CacheError::Corrupt {
            key: CacheKey::Order(id).to_string(),
            reason: e.to_string(),
        })
    }

    /// Drop the order blob.
    async fn invalidate(&self, id: OrderId) -> CacheResult<()>;
}

#[async_trait]
impl<T: CacheAdapter + ?Sized> CacheAdapter for Arc<T> {
    async fn put(&self, order: &Order) -> CacheResult<()> {
        (**self).put(order).await
    }

    async fn get(&self, id: OrderId) -> CacheResult<Vec<u8>> {
        (**self).get(id).await
    }

    async fn get_order(&self, id: OrderId) -> CacheResult<Order> {
        (**self).get_order(id).await
    }

    async fn invalidate(&self, id: OrderId) -> CacheResult<()> {
        (**self).invalidate(id).await
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (absent or expired).
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload bytes held.
    pub memory_bytes: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
