//! orderflow core - order model and error taxonomy
//!
//! Pure data structures and the inbound decoder. No I/O; every other crate
//! depends on this one.

pub mod error;
pub mod identity;
pub mod model;

pub use error::*;
pub use identity::*;
pub use model::{decode, encode, Delivery, Item, Order, Payment};

use serde::{Deserialize, Serialize};

/// Entity type discriminator used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Order,
    Delivery,
    Payment,
    Item,
}

impl EntityType {
    /// Relational table backing this entity.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::Order => "orders",
            EntityType::Delivery => "delivery",
            EntityType::Payment => "payment",
            EntityType::Item => "items",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_table_names() {
        assert_eq!(EntityType::Order.table_name(), "orders");
        assert_eq!(EntityType::Item.to_string(), "items");
    }
}
