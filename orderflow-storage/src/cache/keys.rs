//! Cache key layout.
//!
//! Keys are `<kind>:<id>` strings, one namespace per entity. The blob for an
//! order lives under `order:<id>`; the small denormalized fragments live under
//! `delivery:<id>`, `payment:<id>` and `item:<id>`.

use std::fmt;
use std::str::FromStr;

use orderflow_core::{EntityType, OrderId, RowId};

const SEPARATOR: char = ':';

/// A typed cache key. Construct one per entity kind; never format by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Order(OrderId),
    Delivery(RowId),
    Payment(RowId),
    Item(RowId),
}

/// Returned when a string is not a valid cache key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cache key: {0}")]
pub struct InvalidCacheKey(pub String);

impl CacheKey {
    pub fn entity_type(&self) -> EntityType {
        match self {
            CacheKey::Order(_) => EntityType::Order,
            CacheKey::Delivery(_) => EntityType::Delivery,
            CacheKey::Payment(_) => EntityType::Payment,
            CacheKey::Item(_) => EntityType::Item,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            CacheKey::Order(id)
            | CacheKey::Delivery(id)
            | CacheKey::Payment(id)
            | CacheKey::Item(id) => *id,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            CacheKey::Order(_) => "order",
            CacheKey::Delivery(_) => "delivery",
            CacheKey::Payment(_) => "payment",
            CacheKey::Item(_) => "item",
        }
    }

    /// Byte form used by byte-keyed backends.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok()?.parse().ok()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.prefix(), SEPARATOR, self.id())
    }
}

impl FromStr for CacheKey {
    type Err = InvalidCacheKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCacheKey(s.to_string());
        let (prefix, id) = s.split_once(SEPARATOR).ok_or_else(invalid)?;
        let id: i64 = id.parse().map_err(|_| invalid())?;
        match prefix {
            "order" => Ok(CacheKey::Order(id)),
            "delivery" => Ok(CacheKey::Delivery(id)),
            "payment" => Ok(CacheKey::Payment(id)),
            "item" => Ok(CacheKey::Item(id)),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        assert_eq!(CacheKey::Order(12).to_string(), "order:12");
        assert_eq!(CacheKey::Delivery(3).to_string(), "delivery:3");
        assert_eq!(CacheKey::Payment(4).to_string(), "payment:4");
        assert_eq!(CacheKey::Item(5).to_string(), "item:5");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("order".parse::<CacheKey>().is_err());
        assert!("order:abc".parse::<CacheKey>().is_err());
        assert!("customer:1".parse::<CacheKey>().is_err());
        assert!(CacheKey::decode(&[0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_entity_type() {
        assert_eq!(CacheKey::Item(1).entity_type(), EntityType::Item);
        assert_eq!(CacheKey::Order(1).entity_type(), EntityType::Order);
    }
}
