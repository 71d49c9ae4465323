//! orderflow Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for orders and sub-entities
//! - Cache adapters that fail, stall or record on demand
//! - Fixtures for the canonical sample order
//! - Assertions over `OrderflowResult`

pub use orderflow_storage::cache::{CacheAdapter, CacheResult, InMemoryCache, OrderCache};
pub use orderflow_storage::{MockStore, StoreFault, StoreStep};

pub use orderflow_core::{
    CacheError, Delivery, EntityType, Item, Order, OrderId, OrderflowError, OrderflowResult,
    Payment, StorageError,
};

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// CACHE DOUBLES
// ============================================================================

/// Cache adapter whose every operation fails with the configured error.
#[derive(Debug, Clone)]
pub struct FailingCache {
    error: CacheError,
}

impl FailingCache {
    pub fn new(error: CacheError) -> Self {
        Self { error }
    }

    /// Fails like an unreachable backend.
    pub fn unavailable() -> Self {
        Self::new(CacheError::Backend {
            reason: "cache unavailable".to_string(),
        })
    }
}

#[async_trait]
impl CacheAdapter for FailingCache {
    async fn put(&self, _order: &Order) -> CacheResult<()> {
        Err(self.error.clone())
    }

    async fn get(&self, _id: OrderId) -> CacheResult<Vec<u8>> {
        Err(self.error.clone())
    }

    async fn invalidate(&self, _id: OrderId) -> CacheResult<()> {
        Err(self.error.clone())
    }
}

/// Cache adapter that sleeps before delegating, for timeout tests.
pub struct SlowCache<C> {
    inner: C,
    delay: Duration,
}

impl<C: CacheAdapter> SlowCache<C> {
    pub fn new(inner: C, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<C: CacheAdapter> CacheAdapter for SlowCache<C> {
    async fn put(&self, order: &Order) -> CacheResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(order).await
    }

    async fn get(&self, id: OrderId) -> CacheResult<Vec<u8>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(id).await
    }

    async fn invalidate(&self, id: OrderId) -> CacheResult<()> {
        self.inner.invalidate(id).await
    }
}

/// In-memory order cache that also records which ids were put.
pub struct RecordingCache {
    inner: OrderCache<InMemoryCache>,
    puts: Mutex<Vec<OrderId>>,
}

impl Default for RecordingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingCache {
    pub fn new() -> Self {
        Self {
            inner: OrderCache::new(InMemoryCache::default()),
            puts: Mutex::new(Vec::new()),
        }
    }

    /// Ids passed to `put`, in call order.
    pub fn puts(&self) -> Vec<OrderId> {
        self.puts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn inner(&self) -> &OrderCache<InMemoryCache> {
        &self.inner
    }
}

#[async_trait]
impl CacheAdapter for RecordingCache {
    async fn put(&self, order: &Order) -> CacheResult<()> {
        if let Ok(mut puts) = self.puts.lock() {
            puts.push(order.id);
        }
        self.inner.put(order).await
    }

    async fn get(&self, id: OrderId) -> CacheResult<Vec<u8>> {
        self.inner.get(id).await
    }

    async fn invalidate(&self, id: OrderId) -> CacheResult<()> {
        self.inner.invalidate(id).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for orders and their sub-entities.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_delivery() -> impl Strategy<Value = Delivery> {
        (
            "[A-Z][a-z]{1,10} [A-Z][a-z]{1,10}",
            "\\+[0-9]{10}",
            "[0-9]{5,7}",
            "[A-Z][a-z]{2,12}",
            "[A-Za-z0-9 ]{3,24}",
            "[A-Z][a-z]{2,12}",
            "[a-z]{3,10}@[a-z]{3,8}\\.com",
        )
            .prop_map(|(name, phone, zip, city, address, region, email)| Delivery {
                id: 0,
                name,
                phone,
                zip,
                city,
                address,
                region,
                email,
            })
    }

    pub fn arb_payment() -> impl Strategy<Value = Payment> {
        (
            "[a-z0-9]{8,20}",
            "[a-z0-9]{0,8}",
            prop_oneof![Just("USD"), Just("EUR"), Just("RUB")],
            0i64..1_000_000,
            0i64..2_000_000_000,
            0i64..10_000,
            0i64..1_000_000,
        )
            .prop_map(
                |(transaction, request_id, currency, amount, payment_dt, delivery_cost, goods_total)| {
                    Payment {
                        id: 0,
                        transaction,
                        request_id,
                        currency: currency.to_string(),
                        provider: "wbpay".to_string(),
                        amount,
                        payment_dt,
                        bank: "alpha".to_string(),
                        delivery_cost,
                        goods_total,
                        custom_fee: 0,
                    }
                },
            )
    }

    /// Valid item on the given track number.
    pub fn arb_item(track_number: String) -> impl Strategy<Value = Item> {
        (
            1i64..10_000_000,
            0i64..100_000,
            0i64..=100,
            "[A-Za-z ]{1,20}",
            any::<u16>(),
        )
            .prop_map(move |(chrt_id, price, sale, name, status)| Item {
                id: 0,
                chrt_id,
                track_number: track_number.clone(),
                price,
                rid: format!("rid-{chrt_id}"),
                name,
                sale,
                size: "0".to_string(),
                total_price: price * (100 - sale) / 100,
                nm_id: chrt_id * 7,
                brand: "Brand".to_string(),
                status: i64::from(status),
            })
    }

    /// Valid order with 0..4 items sharing its track number.
    pub fn arb_order() -> impl Strategy<Value = Order> {
        ("[a-z0-9]{12,20}", "[A-Z0-9]{6,14}")
            .prop_flat_map(|(uid, track)| {
                (
                    Just(uid),
                    Just(track.clone()),
                    arb_delivery(),
                    arb_payment(),
                    prop::collection::vec(arb_item(track), 0..4),
                )
            })
            .prop_map(|(order_uid, track_number, delivery, payment, items)| Order {
                id: 0,
                order_uid,
                track_number,
                entry: "WBIL".to_string(),
                delivery,
                payment,
                items,
                locale: "en".to_string(),
                internal_signature: String::new(),
                customer_id: "test".to_string(),
                delivery_service: "meest".to_string(),
                shardkey: "9".to_string(),
                sm_id: 99,
                date_created: "2021-11-26T06:22:19Z".to_string(),
                oof_shard: "1".to_string(),
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built orders and payloads.

    use super::*;

    /// The canonical bootstrap order: `test-uid-1`, delivered to Jane Doe,
    /// paid by `tx-1`, one item `999` on `TRK1`.
    pub fn sample_order() -> Order {
        sample_order_with_uid("test-uid-1")
    }

    pub fn sample_order_with_uid(order_uid: &str) -> Order {
        Order {
            id: 0,
            order_uid: order_uid.to_string(),
            track_number: "TRK1".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                id: 0,
                name: "Jane Doe".to_string(),
                phone: "+15550000000".to_string(),
                zip: "2639809".to_string(),
                city: "Springfield".to_string(),
                address: "Evergreen Terrace 742".to_string(),
                region: "Oregon".to_string(),
                email: "jane@example.com".to_string(),
            },
            payment: Payment {
                id: 0,
                transaction: "tx-1".to_string(),
                request_id: String::new(),
                currency: "USD".to_string(),
                provider: "wbpay".to_string(),
                amount: 500,
                payment_dt: 1637907727,
                bank: "alpha".to_string(),
                delivery_cost: 400,
                goods_total: 100,
                custom_fee: 0,
            },
            items: vec![Item {
                id: 0,
                chrt_id: 999,
                track_number: "TRK1".to_string(),
                price: 100,
                rid: "rid-999".to_string(),
                name: "Mascaras".to_string(),
                sale: 0,
                size: "0".to_string(),
                total_price: 100,
                nm_id: 2389212,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            }],
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: "2021-11-26T06:22:19Z".to_string(),
            oof_shard: "1".to_string(),
        }
    }

    /// Wire payload for [`sample_order_with_uid`].
    pub fn sample_payload(order_uid: &str) -> Vec<u8> {
        serde_json::to_vec(&sample_order_with_uid(order_uid)).unwrap_or_default()
    }

    /// Payload that is not JSON at all.
    pub fn garbage_payload() -> Vec<u8> {
        b"\x00\xffdefinitely not an order".to_vec()
    }

    /// Well-formed JSON without an `order_uid`.
    pub fn payload_without_uid() -> Vec<u8> {
        br#"{"track_number":"TRK1","delivery":{"name":"X"},"payment":{"transaction":"t"},"items":[]}"#
            .to_vec()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over orderflow results.

    use super::*;

    /// Assert that a result is a NotFound storage error for `entity_type`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(
        result: &OrderflowResult<T>,
        entity_type: EntityType,
    ) {
        match result {
            Err(OrderflowError::Storage(StorageError::NotFound { entity_type: et, .. })) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    /// Assert two orders are equal ignoring store-assigned ids.
    #[track_caller]
    pub fn assert_same_content(a: &Order, b: &Order) {
        let mut a = a.clone();
        let mut b = b.clone();
        a.clear_ids();
        b.clear_ids();
        assert_eq!(a, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_payload_decodes() {
        let order = orderflow_core::decode(&fixtures::sample_payload("x")).expect("decodes");
        assert_eq!(order.order_uid, "x");
        assert_eq!(order.delivery.name, "Jane Doe");
    }

    #[test]
    fn test_bad_payloads_fail_decode() {
        assert!(orderflow_core::decode(&fixtures::garbage_payload()).is_err());
        assert!(orderflow_core::decode(&fixtures::payload_without_uid()).is_err());
    }

    #[tokio::test]
    async fn test_recording_cache_records_puts() {
        let cache = RecordingCache::new();
        let mut order = fixtures::sample_order();
        order.id = 3;
        cache.put(&order).await.expect("put");
        assert_eq!(cache.puts(), vec![3]);
        assert!(cache.get(3).await.is_ok());
    }
}
