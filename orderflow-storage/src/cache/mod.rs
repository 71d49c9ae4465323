//! Cache layer: a disposable projection of the store.
//!
//! Any entry may vanish at any time and must be reconstructible from the
//! store. Backends deal in bytes under typed [`CacheKey`]s; [`OrderCache`]
//! turns that into the order-level [`CacheAdapter`] contract.

pub mod in_memory;
pub mod keys;
pub mod lmdb_backend;
pub mod order_cache;
pub mod traits;

pub use in_memory::InMemoryCache;
pub use keys::{CacheKey, InvalidCacheKey};
pub use lmdb_backend::{LmdbCache, LmdbCacheError};
pub use order_cache::OrderCache;
pub use traits::{CacheAdapter, CacheBackend, CacheResult, CacheStats};
