//! Order aggregate and its sub-entities.
//!
//! An [`Order`] owns exactly one [`Delivery`], one [`Payment`] and an ordered
//! list of [`Item`]s. Internal ids are assigned by the store; everything else
//! arrives on the wire.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::{ContentHash, Fingerprinter, OrderId, RowId};

/// Recipient and address of an order. Content-addressed by the full tuple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub id: RowId,
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

impl Delivery {
    /// Fingerprint over every attribute (id excluded).
    pub fn fingerprint(&self) -> ContentHash {
        Fingerprinter::new("delivery")
            .str(&self.name)
            .str(&self.phone)
            .str(&self.zip)
            .str(&self.city)
            .str(&self.address)
            .str(&self.region)
            .str(&self.email)
            .finish()
    }
}

/// Payment details. Content-addressed by (transaction, request_id, amount).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub id: RowId,
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

impl Payment {
    pub fn fingerprint(&self) -> ContentHash {
        Fingerprinter::new("payment")
            .str(&self.transaction)
            .str(&self.request_id)
            .int(self.amount)
            .finish()
    }
}

/// One line item. Content-addressed by (chrt_id, track_number, price).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub id: RowId,
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    pub sale: i64,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i64,
}

impl Item {
    pub fn fingerprint(&self) -> ContentHash {
        Fingerprinter::new("item")
            .int(self.chrt_id)
            .str(&self.track_number)
            .int(self.price)
            .finish()
    }
}

/// The root entity of the ingestion unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub id: OrderId,
    #[serde(default)]
    pub order_uid: String,
    #[serde(default)]
    pub track_number: String,
    #[serde(default)]
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    #[serde(default)]
    pub items: Vec<Item>,
    /// Some producers send this key as `loacale`.
    #[serde(default, alias = "loacale")]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub delivery_service: String,
    #[serde(default)]
    pub shardkey: String,
    #[serde(default)]
    pub sm_id: i64,
    #[serde(default)]
    pub date_created: String,
    #[serde(default)]
    pub oof_shard: String,
}

impl Order {
    /// Serialize to the wire/cache JSON representation, ids included.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize a blob produced by [`Order::to_json_bytes`], keeping ids.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Zero every store-assigned id.
    pub fn clear_ids(&mut self) {
        self.id = 0;
        self.delivery.id = 0;
        self.payment.id = 0;
        for item in &mut self.items {
            item.id = 0;
        }
    }

    /// Check the fields the store needs to place this order.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.order_uid.trim().is_empty() {
            return Err(DecodeError::MissingField {
                field: "order_uid".to_string(),
            });
        }
        if self.track_number.trim().is_empty() {
            return Err(DecodeError::MissingField {
                field: "track_number".to_string(),
            });
        }
        Ok(())
    }
}

/// Decode an inbound payload (stream message or bootstrap file).
///
/// Ids present in the payload are discarded; the store assigns them.
pub fn decode(bytes: &[u8]) -> Result<Order, DecodeError> {
    let mut order: Order = serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed {
        reason: e.to_string(),
    })?;
    order.validate()?;
    order.clear_ids();
    Ok(order)
}

/// Encode an order as an outbound stream message.
pub fn encode(order: &Order) -> Result<Vec<u8>, DecodeError> {
    order.to_json_bytes().map_err(|e| DecodeError::InvalidValue {
        field: "order".to_string(),
        reason: e.to_string(),
    })
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Arbitrary bytes never decode into an order with an empty identifier.
        #[test]
        fn prop_decode_never_yields_blank_uid(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            if let Ok(order) = decode(&bytes) {
                prop_assert!(!order.order_uid.trim().is_empty());
            }
        }

        /// Item fingerprints depend only on the key tuple.
        #[test]
        fn prop_item_fingerprint_key_only(
            chrt_id in any::<i64>(),
            track in "[A-Z0-9]{1,12}",
            price in 0i64..1_000_000,
            name_a in "[a-z ]{0,16}",
            name_b in "[a-z ]{0,16}",
        ) {
            let a = Item { chrt_id, track_number: track.clone(), price, name: name_a, ..Default::default() };
            let b = Item { chrt_id, track_number: track, price, name: name_b, ..Default::default() };
            prop_assert_eq!(a.fingerprint(), b.fingerprint());
        }
    }
}
