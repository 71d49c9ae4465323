//! In-memory store with the same transactional semantics as the Postgres store.
//!
//! A write clones the committed tables into a staging copy, runs the upserts
//! against the copy and swaps it in only on success. Errors and panics drop
//! the copy, so nothing partial is ever visible.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use orderflow_core::{
    ContentHash, Delivery, EntityType, Item, Order, OrderId, Payment, RowId, StorageError,
};

use crate::{
    check_item, check_payment, write_order_with, ExistingOrder, OrderWriter, StorageResult,
    StoreAdapter, UpsertOutcome, WriteOutcome,
};

/// One upsert step of a transactional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreStep {
    Delivery,
    Payment,
    Item,
    Order,
}

/// Fault injected into every write until cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// The step returns `StorageError::InsertFailed`.
    FailOn(StoreStep),
    /// The step panics mid-transaction.
    PanicOn(StoreStep),
}

#[derive(Debug, Clone)]
struct OrderRow {
    order: Order,
    delivery_id: RowId,
    payment_id: RowId,
}

/// Committed state: four tables, their uniqueness indexes and id sequences.
#[derive(Debug, Clone, Default)]
struct Tables {
    orders: BTreeMap<OrderId, OrderRow>,
    order_uids: HashMap<String, OrderId>,
    deliveries: BTreeMap<RowId, Delivery>,
    delivery_hashes: HashMap<ContentHash, RowId>,
    payments: BTreeMap<RowId, Payment>,
    payment_hashes: HashMap<ContentHash, RowId>,
    items: BTreeMap<RowId, Item>,
    item_hashes: HashMap<ContentHash, RowId>,
    next_order: OrderId,
    next_delivery: RowId,
    next_payment: RowId,
    next_item: RowId,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

/// Mock store for tests and local runs without PostgreSQL.
#[derive(Debug, Default)]
pub struct MockStore {
    tables: RwLock<Tables>,
    // Serializes writers so staged copies never overwrite each other.
    write_lock: tokio::sync::Mutex<()>,
    fault: Mutex<Option<StoreFault>>,
    write_delay: Mutex<Option<Duration>>,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    reads: AtomicU64,
}

impl MockStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, the form the pipeline and read path take.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Inject (or clear, with `None`) a fault for subsequent writes.
    pub fn set_fault(&self, fault: Option<StoreFault>) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = fault;
        }
    }

    /// Make every write sleep before its first upsert.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.write_delay.lock() {
            *slot = delay;
        }
    }

    pub fn order_count(&self) -> usize {
        self.tables.read().map(|t| t.orders.len()).unwrap_or(0)
    }

    pub fn delivery_count(&self) -> usize {
        self.tables.read().map(|t| t.deliveries.len()).unwrap_or(0)
    }

    pub fn payment_count(&self) -> usize {
        self.tables.read().map(|t| t.payments.len()).unwrap_or(0)
    }

    pub fn item_count(&self) -> usize {
        self.tables.read().map(|t| t.items.len()).unwrap_or(0)
    }

    /// Delivery id referenced by an order row.
    pub fn delivery_id_of(&self, id: OrderId) -> Option<RowId> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.orders.get(&id).map(|row| row.delivery_id))
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Drop all data and counters.
    pub fn clear(&self) {
        if let Ok(mut tables) = self.tables.write() {
            *tables = Tables::default();
        }
        self.commits.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
        self.reads.store(0, Ordering::Relaxed);
    }

    fn current_fault(&self) -> Option<StoreFault> {
        self.fault.lock().ok().and_then(|f| *f)
    }

    fn current_delay(&self) -> Option<Duration> {
        self.write_delay.lock().ok().and_then(|d| *d)
    }
}

/// Writer over a staged copy of the tables.
struct MockOrderWriter<'a> {
    staged: &'a mut Tables,
    fault: Option<StoreFault>,
}

impl<'a> MockOrderWriter<'a> {
    fn inject(&self, step: StoreStep, entity_type: EntityType) -> StorageResult<()> {
        match self.fault {
            Some(StoreFault::FailOn(s)) if s == step => Err(StorageError::InsertFailed {
                entity_type,
                reason: "injected failure".to_string(),
            }),
            Some(StoreFault::PanicOn(s)) if s == step => {
                panic!("injected panic during {entity_type} upsert")
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<'a> OrderWriter for MockOrderWriter<'a> {
    async fn find_existing(&mut self, order_uid: &str) -> StorageResult<Option<ExistingOrder>> {
        Ok(self
            .staged
            .order_uids
            .get(order_uid)
            .and_then(|id| self.staged.orders.get(id))
            .map(|row| ExistingOrder {
                id: row.order.id,
                delivery_id: row.delivery_id,
                payment_id: row.payment_id,
            }))
    }

    async fn upsert_delivery(&mut self, delivery: &Delivery) -> StorageResult<RowId> {
        self.inject(StoreStep::Delivery, EntityType::Delivery)?;
        let hash = delivery.fingerprint();
        if let Some(id) = self.staged.delivery_hashes.get(&hash) {
            return Ok(*id);
        }
        let id = next(&mut self.staged.next_delivery);
        let mut row = delivery.clone();
        row.id = id;
        self.staged.deliveries.insert(id, row);
        self.staged.delivery_hashes.insert(hash, id);
        Ok(id)
    }

    async fn upsert_payment(&mut self, payment: &Payment) -> StorageResult<RowId> {
        self.inject(StoreStep::Payment, EntityType::Payment)?;
        check_payment(payment)?;
        let hash = payment.fingerprint();
        if let Some(id) = self.staged.payment_hashes.get(&hash) {
            return Ok(*id);
        }
        let id = next(&mut self.staged.next_payment);
        let mut row = payment.clone();
        row.id = id;
        self.staged.payments.insert(id, row);
        self.staged.payment_hashes.insert(hash, id);
        Ok(id)
    }

    async fn upsert_item(&mut self, item: &Item) -> StorageResult<RowId> {
        self.inject(StoreStep::Item, EntityType::Item)?;
        check_item(item)?;
        let hash = item.fingerprint();
        if let Some(id) = self.staged.item_hashes.get(&hash) {
            return Ok(*id);
        }
        let id = next(&mut self.staged.next_item);
        let mut row = item.clone();
        row.id = id;
        self.staged.items.insert(id, row);
        self.staged.item_hashes.insert(hash, id);
        Ok(id)
    }

    async fn upsert_order(&mut self, order: &Order) -> StorageResult<UpsertOutcome> {
        self.inject(StoreStep::Order, EntityType::Order)?;
        if let Some(id) = self.staged.order_uids.get(&order.order_uid) {
            return Ok(UpsertOutcome::AlreadyExists(*id));
        }
        for (entity_type, id, present) in [
            (
                EntityType::Delivery,
                order.delivery.id,
                self.staged.deliveries.contains_key(&order.delivery.id),
            ),
            (
                EntityType::Payment,
                order.payment.id,
                self.staged.payments.contains_key(&order.payment.id),
            ),
        ] {
            if !present {
                return Err(StorageError::ConstraintViolation {
                    constraint: format!("orders_{entity_type}_fk"),
                    reason: format!("{entity_type} {id} does not exist"),
                });
            }
        }

        let id = next(&mut self.staged.next_order);
        let mut header = order.clone();
        header.id = id;
        header.items.clear();
        self.staged.orders.insert(
            id,
            OrderRow {
                order: header,
                delivery_id: order.delivery.id,
                payment_id: order.payment.id,
            },
        );
        self.staged.order_uids.insert(order.order_uid.clone(), id);
        Ok(UpsertOutcome::Inserted(id))
    }
}

#[async_trait]
impl StoreAdapter for MockStore {
    async fn write_order(&self, order: &mut Order) -> StorageResult<WriteOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut staged = self
            .tables
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .clone();
        let fault = self.current_fault();
        if let Some(delay) = self.current_delay() {
            tokio::time::sleep(delay).await;
        }

        let mut working = order.clone();
        let result = {
            let mut writer = MockOrderWriter {
                staged: &mut staged,
                fault,
            };
            AssertUnwindSafe(write_order_with(&mut writer, &mut working))
                .catch_unwind()
                .await
        };

        match result {
            Ok(Ok(outcome)) if outcome.is_replay() => {
                // Nothing new to keep; the staged copy is dropped.
                *order = working;
                Ok(outcome)
            }
            Ok(Ok(outcome)) => {
                let mut tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
                *tables = staged;
                self.commits.fetch_add(1, Ordering::Relaxed);
                *order = working;
                Ok(outcome)
            }
            Ok(Err(e)) => {
                self.rollbacks.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
            Err(_) => {
                self.rollbacks.fetch_add(1, Ordering::Relaxed);
                Err(StorageError::TransactionFailed {
                    reason: "panic during write_order; transaction rolled back".to_string(),
                })
            }
        }
    }

    async fn read_order(&self, id: OrderId) -> StorageResult<Order> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        let row = tables.orders.get(&id).ok_or_else(|| StorageError::NotFound {
            entity_type: EntityType::Order,
            id: id.to_string(),
        })?;

        let mut order = row.order.clone();
        order.delivery = tables
            .deliveries
            .get(&row.delivery_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                entity_type: EntityType::Delivery,
                id: row.delivery_id.to_string(),
            })?;
        order.payment = tables
            .payments
            .get(&row.payment_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                entity_type: EntityType::Payment,
                id: row.payment_id.to_string(),
            })?;
        // BTreeMap iteration is id order.
        order.items = tables
            .items
            .values()
            .filter(|item| item.track_number == order.track_number)
            .cloned()
            .collect();
        Ok(order)
    }

    async fn find_order_id(&self, order_uid: &str) -> StorageResult<Option<OrderId>> {
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(tables.order_uids.get(order_uid).copied())
    }

    async fn ping(&self) -> StorageResult<()> {
        self.tables
            .read()
            .map(|_| ())
            .map_err(|_| StorageError::LockPoisoned)
    }
}
