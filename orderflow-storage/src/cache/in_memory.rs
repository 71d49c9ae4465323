//! In-process cache backend.
//!
//! Capacity-bounded: when full, the oldest entry (by insertion sequence) is
//! evicted. Entries older than the TTL read as a miss and are dropped.
//!
//! Insertion order lives in a queue of `(seq, key)` records. Overwrites and
//! deletes leave stale records behind; eviction skips them and the queue is
//! compacted once it grows past twice the capacity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::keys::CacheKey;
use super::traits::{CacheBackend, CacheResult, CacheStats};
use orderflow_core::CacheError;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    inserted_at: Instant,
    seq: u64,
}

/// DashMap-backed cache shared by the pipeline and read path.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: DashMap<CacheKey, Entry>,
    order: Mutex<VecDeque<(u64, CacheKey)>>,
    capacity: usize,
    ttl: Option<Duration>,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCache {
    /// `capacity` of zero is treated as one.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            ttl,
            seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.order().clear();
        self.entries.clear();
    }

    fn order(&self) -> MutexGuard<'_, VecDeque<(u64, CacheKey)>> {
        self.order.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl
            .map(|ttl| entry.inserted_at.elapsed() >= ttl)
            .unwrap_or(false)
    }

    /// Pop queue records until one still matches a live entry and remove it.
    /// Returns false when nothing is left to evict.
    fn evict_oldest(&self, order: &mut VecDeque<(u64, CacheKey)>) -> bool {
        while let Some((seq, key)) = order.pop_front() {
            if self.entries.remove_if(&key, |_, e| e.seq == seq).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %key, "evicted cache entry");
                return true;
            }
        }
        false
    }

    fn compact(&self, order: &mut VecDeque<(u64, CacheKey)>) {
        order.retain(|(seq, key)| {
            self.entries
                .get(key)
                .map(|e| e.seq == *seq)
                .unwrap_or(false)
        });
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(10_000, None)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn set(&self, key: &CacheKey, value: &[u8]) -> CacheResult<()> {
        let mut order = self.order();
        if !self.entries.contains_key(key) {
            while self.entries.len() >= self.capacity {
                if !self.evict_oldest(&mut order) {
                    break;
                }
            }
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            *key,
            Entry {
                value: value.to_vec(),
                inserted_at: Instant::now(),
                seq,
            },
        );
        order.push_back((seq, *key));
        if order.len() > self.capacity.saturating_mul(2) {
            self.compact(&mut order);
        }
        Ok(())
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Vec<u8>> {
        let found = match self.entries.get(key) {
            Some(entry) if !self.is_expired(&entry) => Some(entry.value.clone()),
            Some(_) => {
                // Guard must be released before removing.
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(CacheError::Miss {
                    key: key.to_string(),
                });
            }
        };

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            None => {
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Miss {
                    key: key.to_string(),
                })
            }
        }
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let memory_bytes = self
            .entries
            .iter()
            .map(|e| e.value().value.len() as u64)
            .sum();
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}
