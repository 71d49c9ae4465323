//! LMDB-backed persistent cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped key-value
//! store that survives restarts of the service.
//!
//! # Value layout
//!
//! `[cached_at: 8 bytes, i64 millis LE][payload]`. The timestamp drives TTL
//! expiry on read.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use orderflow_core::CacheError;

use super::keys::CacheKey;
use super::traits::{CacheBackend, CacheResult, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

/// LMDB cache backend.
///
/// heed calls block, so every operation runs on the blocking pool. A caller
/// wrapping an operation in `tokio::time::timeout` gets control back when the
/// timeout fires even if LMDB is stalled.
pub struct LmdbCache {
    shared: Arc<LmdbShared>,
}

struct LmdbShared {
    env: Env,
    db: Database<Bytes, Bytes>,
    ttl: Option<Duration>,
    stats: RwLock<CacheStats>,
}

impl LmdbCache {
    /// Open (or create) the cache at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `ttl` - Entries older than this read as a miss
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        ttl: Option<Duration>,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let entry_count = {
            let rtxn = env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            db.len(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
        };

        Ok(Self {
            shared: Arc::new(LmdbShared {
                env,
                db,
                ttl,
                stats: RwLock::new(CacheStats {
                    entry_count,
                    ..Default::default()
                }),
            }),
        })
    }

    /// Run `op` against the environment on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbShared) -> CacheResult<T> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || op(&shared))
            .await
            .map_err(|e| CacheError::Backend {
                reason: format!("lmdb task failed: {e}"),
            })?
    }
}

impl LmdbShared {
    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn is_expired(&self, cached_at: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(cached_at);
                age.to_std().map(|age| age >= ttl).unwrap_or(false)
            }
            None => false,
        }
    }

    fn put(&self, encoded_key: &[u8], value: &[u8]) -> Result<(), LmdbCacheError> {
        let timestamp_bytes = Utc::now().timestamp_millis().to_le_bytes();
        let mut full_bytes = Vec::with_capacity(8 + value.len());
        full_bytes.extend_from_slice(&timestamp_bytes);
        full_bytes.extend_from_slice(value);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let is_new = self
            .db
            .get(&wtxn, encoded_key)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            .is_none();

        self.db
            .put(&mut wtxn, encoded_key, &full_bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            if is_new {
                stats.entry_count += 1;
            }
            stats.memory_bytes += full_bytes.len() as u64;
        }
        Ok(())
    }

    fn fetch(&self, key: &CacheKey) -> CacheResult<Vec<u8>> {
        let encoded_key = key.encode();
        let found = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let stored = self
                .db
                .get(&rtxn, &encoded_key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            match stored {
                Some(bytes) => match split_value(bytes) {
                    Some((cached_at, payload)) => Some((cached_at, payload.to_vec())),
                    None => {
                        return Err(CacheError::Corrupt {
                            key: key.to_string(),
                            reason: "value shorter than timestamp header".to_string(),
                        })
                    }
                },
                None => None,
            }
        };

        match found {
            Some((cached_at, payload)) if !self.is_expired(cached_at) => {
                self.record_hit();
                Ok(payload)
            }
            Some(_) => {
                self.remove(&encoded_key)?;
                self.record_miss();
                Err(CacheError::Miss {
                    key: key.to_string(),
                })
            }
            None => {
                self.record_miss();
                Err(CacheError::Miss {
                    key: key.to_string(),
                })
            }
        }
    }

    fn remove(&self, encoded_key: &[u8]) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let deleted = self
            .db
            .delete(&mut wtxn, encoded_key)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        if deleted {
            if let Ok(mut stats) = self.stats.write() {
                stats.entry_count = stats.entry_count.saturating_sub(1);
            }
        }
        Ok(deleted)
    }
}

/// Split a stored value into its timestamp and payload.
fn split_value(bytes: &[u8]) -> Option<(DateTime<Utc>, &[u8])> {
    if bytes.len() < 8 {
        return None;
    }
    let timestamp_bytes: [u8; 8] = bytes[0..8].try_into().ok()?;
    let cached_at = DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes))?;
    Some((cached_at, &bytes[8..]))
}

#[async_trait]
impl CacheBackend for LmdbCache {
    async fn set(&self, key: &CacheKey, value: &[u8]) -> CacheResult<()> {
        let encoded_key = key.encode();
        let value = value.to_vec();
        self.blocking(move |shared| Ok(shared.put(&encoded_key, &value)?))
            .await
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Vec<u8>> {
        let key = *key;
        self.blocking(move |shared| shared.fetch(&key)).await
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let encoded_key = key.encode();
        self.blocking(move |shared| Ok(shared.remove(&encoded_key)?))
            .await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.shared
            .stats
            .read()
            .map(|s| s.clone())
            .map_err(|_| CacheError::Backend {
                reason: "stats lock poisoned".to_string(),
            })
    }
}
