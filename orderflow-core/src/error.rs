//! Error types for orderflow operations

use crate::EntityType;
use thiserror::Error;

/// Errors raised while turning raw bytes into an [`crate::Order`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed order payload: {reason}")]
    Malformed { reason: String },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Relational store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Store operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Store connection error: {reason}")]
    Connection { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache errors. None of these are fatal to ingestion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache miss for key {key}")]
    Miss { key: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache write partially failed for keys {failed_keys:?}")]
    PartialWrite { failed_keys: Vec<String> },

    #[error("Corrupt cache entry for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Cache serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Cache operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl CacheError {
    /// True when the entry simply is not there (absent or expired).
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss { .. })
    }
}

/// Stream transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("Transport disconnected: {reason}")]
    Disconnected { reason: String },

    #[error("Publish failed: {reason}")]
    Publish { reason: String },

    #[error("Unknown delivery tag {tag}")]
    UnknownTag { tag: u64 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration file {path}: {reason}")]
    FileUnreadable { path: String, reason: String },
}

/// Master error type for all orderflow errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderflowError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A backend could not be reached at startup.
    #[error("Connection to {backend} failed: {reason}")]
    Connection { backend: String, reason: String },
}

impl OrderflowError {
    /// Whether this error means the requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrderflowError::Storage(StorageError::NotFound { .. }))
    }

    /// Create a not-found error for an order by internal id.
    pub fn order_not_found(id: impl std::fmt::Display) -> Self {
        OrderflowError::Storage(StorageError::NotFound {
            entity_type: EntityType::Order,
            id: id.to_string(),
        })
    }
}

/// Result type alias for orderflow operations.
pub type OrderflowResult<T> = Result<T, OrderflowError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity_type: EntityType::Order,
            id: "42".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("Order"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_decode_error_display_missing_field() {
        let err = DecodeError::MissingField {
            field: "order_uid".to_string(),
        };
        assert_eq!(format!("{}", err), "Required field missing: order_uid");
    }

    #[test]
    fn test_cache_error_partial_write_lists_keys() {
        let err = CacheError::PartialWrite {
            failed_keys: vec!["delivery:1".to_string(), "item:7".to_string()],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("delivery:1"));
        assert!(msg.contains("item:7"));
    }

    #[test]
    fn test_cache_error_is_miss() {
        assert!(CacheError::Miss { key: "order:1".into() }.is_miss());
        assert!(!CacheError::Backend { reason: "down".into() }.is_miss());
    }

    #[test]
    fn test_orderflow_error_from_variants() {
        let decode = OrderflowError::from(DecodeError::Malformed {
            reason: "eof".to_string(),
        });
        assert!(matches!(decode, OrderflowError::Decode(_)));

        let storage = OrderflowError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, OrderflowError::Storage(_)));

        let cache = OrderflowError::from(CacheError::Timeout { timeout_ms: 5 });
        assert!(matches!(cache, OrderflowError::Cache(_)));

        let transport = OrderflowError::from(TransportError::Closed);
        assert!(matches!(transport, OrderflowError::Transport(_)));

        let config = OrderflowError::from(ConfigError::MissingRequired {
            field: "db.host".to_string(),
        });
        assert!(matches!(config, OrderflowError::Config(_)));
    }

    #[test]
    fn test_order_not_found_is_not_found() {
        assert!(OrderflowError::order_not_found(7).is_not_found());
        assert!(!OrderflowError::from(StorageError::LockPoisoned).is_not_found());
    }
}
