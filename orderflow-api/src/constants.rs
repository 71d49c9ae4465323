//! Constants for the orderflow service
//!
//! Defaults for every configurable value live here so the config layer and
//! the tests agree on them.

// ============================================================================
// SERVER
// ============================================================================

/// Default bind host
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum accepted size of a `POST /messages` body
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

// ============================================================================
// DATABASE
// ============================================================================

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "orders";
pub const DEFAULT_DB_USER: &str = "postgres";

/// Maximum pool size
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Pool wait timeout in seconds
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// CACHE
// ============================================================================

/// Entry capacity of the in-memory cache
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Default LMDB map size in megabytes
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

/// Default LMDB directory
pub const DEFAULT_LMDB_PATH: &str = "./data/cache";

// ============================================================================
// PIPELINE
// ============================================================================

/// Upper bound on one transactional store write (milliseconds)
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Upper bound on one cache write or read (milliseconds)
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 1_000;

/// Directory of `*.json` orders processed once at startup
pub const DEFAULT_BOOTSTRAP_DIR: &str = "./materials";

// ============================================================================
// TELEMETRY
// ============================================================================

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "orderflow=debug,tower_http=info,info";

pub const DEFAULT_SERVICE_NAME: &str = "orderflow-api";

// ============================================================================
// CONFIG FILES
// ============================================================================

/// Environment used to pick `config.<env>.yaml` when `ORDERFLOW_ENV` is unset
pub const DEFAULT_CONFIG_ENV: &str = "local";
