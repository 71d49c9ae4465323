//! In-process index of processed orders.
//!
//! A hint only: it may be empty after a restart and is never consulted to
//! decide whether to write. The store's uniqueness constraints decide that.
//!
//! Bounded: once `capacity` ids are recorded, recording a new id forgets the
//! oldest one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use orderflow_core::OrderId;

/// Default number of ids remembered.
pub const DEFAULT_INDEX_CAPACITY: usize = 100_000;

#[derive(Debug, Default)]
struct Entries {
    uids: HashMap<OrderId, String>,
    recorded: VecDeque<OrderId>,
}

/// Cloneable handle over `internal id -> order_uid`.
#[derive(Debug, Clone)]
pub struct ProcessedIndex {
    inner: Arc<RwLock<Entries>>,
    capacity: usize,
}

impl Default for ProcessedIndex {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INDEX_CAPACITY)
    }
}

impl ProcessedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// `capacity` of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Entries::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, id: OrderId, order_uid: &str) {
        if let Ok(mut entries) = self.inner.write() {
            if entries.uids.insert(id, order_uid.to_string()).is_some() {
                return;
            }
            entries.recorded.push_back(id);
            while entries.recorded.len() > self.capacity {
                if let Some(oldest) = entries.recorded.pop_front() {
                    entries.uids.remove(&oldest);
                }
            }
        }
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.inner
            .read()
            .map(|entries| entries.uids.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn order_uid(&self, id: OrderId) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|entries| entries.uids.get(&id).cloned())
    }

    /// Recorded ids in ascending order.
    pub fn ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self
            .inner
            .read()
            .map(|entries| entries.uids.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|entries| entries.uids.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.inner.write() {
            entries.uids.clear();
            entries.recorded.clear();
        }
    }
}
