//! orderflow storage - store adapter contract, mock store and cache layer
//!
//! The relational store is the source of truth. Every adapter funnels its
//! transactional write through [`write_order_with`] so the upsert order
//! (delivery, payment, items, order) is identical across backends.

pub mod cache;
pub mod mock;

pub use mock::{MockStore, StoreFault, StoreStep};

use std::sync::Arc;

use async_trait::async_trait;
use orderflow_core::{Delivery, Item, Order, OrderId, Payment, RowId, StorageError};

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================================
// UPSERT OUTCOMES
// ============================================================================

/// What `upsert_order` did with the order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was inserted with this id.
    Inserted(OrderId),
    /// A row with the same `order_uid` already existed; nothing was written.
    AlreadyExists(OrderId),
}

impl UpsertOutcome {
    pub fn id(&self) -> OrderId {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::AlreadyExists(id) => *id,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, UpsertOutcome::AlreadyExists(_))
    }
}

/// The stored row for an `order_uid` that is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingOrder {
    pub id: OrderId,
    pub delivery_id: RowId,
    pub payment_id: RowId,
}

/// Resolved ids of one committed `write_order`.
///
/// On a replay `item_ids` is empty: nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub order: UpsertOutcome,
    pub delivery_id: RowId,
    pub payment_id: RowId,
    pub item_ids: Vec<RowId>,
}

impl WriteOutcome {
    pub fn order_id(&self) -> OrderId {
        self.order.id()
    }

    pub fn is_replay(&self) -> bool {
        self.order.is_replay()
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Upsert operations against one open transaction.
///
/// Content-addressed upserts return the id of the existing row when the
/// tuple is already present; they never update in place.
#[async_trait]
pub trait OrderWriter: Send {
    /// Look up the order row already stored for `order_uid`.
    async fn find_existing(&mut self, order_uid: &str) -> StorageResult<Option<ExistingOrder>>;

    async fn upsert_delivery(&mut self, delivery: &Delivery) -> StorageResult<RowId>;

    async fn upsert_payment(&mut self, payment: &Payment) -> StorageResult<RowId>;

    async fn upsert_item(&mut self, item: &Item) -> StorageResult<RowId>;

    /// Insert the order row referencing `order.delivery.id` and
    /// `order.payment.id`, or report the existing row for the same `order_uid`.
    async fn upsert_order(&mut self, order: &Order) -> StorageResult<UpsertOutcome>;
}

/// Transactional store contract used by the ingestion pipeline and read path.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Write the whole order atomically, filling in every resolved id.
    ///
    /// Either every row is visible afterwards or none is.
    async fn write_order(&self, order: &mut Order) -> StorageResult<WriteOutcome>;

    /// Assemble a fully populated order. `NotFound` if the row is absent.
    async fn read_order(&self, id: OrderId) -> StorageResult<Order>;

    /// Look up the internal id for an external order identifier.
    async fn find_order_id(&self, order_uid: &str) -> StorageResult<Option<OrderId>>;

    /// Cheap liveness probe.
    async fn ping(&self) -> StorageResult<()>;
}

#[async_trait]
impl<T: StoreAdapter + ?Sized> StoreAdapter for Arc<T> {
    async fn write_order(&self, order: &mut Order) -> StorageResult<WriteOutcome> {
        (**self).write_order(order).await
    }

    async fn read_order(&self, id: OrderId) -> StorageResult<Order> {
        (**self).read_order(id).await
    }

    async fn find_order_id(&self, order_uid: &str) -> StorageResult<Option<OrderId>> {
        (**self).find_order_id(order_uid).await
    }

    async fn ping(&self) -> StorageResult<()> {
        (**self).ping().await
    }
}

/// Run the four upserts in order: delivery, payment, items, order.
///
/// An `order_uid` that is already stored short-circuits before any
/// sub-entity is touched. Resolved ids are written back into `order`. The
/// caller owns the transaction boundary: it must roll back on any error, and
/// should roll back on a replay, since a writer that lost the `order_uid`
/// race may have inserted sub-entities nobody references.
pub async fn write_order_with<W>(writer: &mut W, order: &mut Order) -> StorageResult<WriteOutcome>
where
    W: OrderWriter + ?Sized,
{
    if let Some(existing) = writer.find_existing(&order.order_uid).await? {
        order.id = existing.id;
        order.delivery.id = existing.delivery_id;
        order.payment.id = existing.payment_id;
        return Ok(WriteOutcome {
            order: UpsertOutcome::AlreadyExists(existing.id),
            delivery_id: existing.delivery_id,
            payment_id: existing.payment_id,
            item_ids: Vec::new(),
        });
    }

    let delivery_id = writer.upsert_delivery(&order.delivery).await?;
    order.delivery.id = delivery_id;

    let payment_id = writer.upsert_payment(&order.payment).await?;
    order.payment.id = payment_id;

    let mut item_ids = Vec::with_capacity(order.items.len());
    for item in order.items.iter_mut() {
        let id = writer.upsert_item(item).await?;
        item.id = id;
        item_ids.push(id);
    }

    let outcome = writer.upsert_order(order).await?;
    order.id = outcome.id();

    Ok(WriteOutcome {
        order: outcome,
        delivery_id,
        payment_id,
        item_ids,
    })
}

/// Reject values the relational schema's CHECK constraints would reject.
pub fn check_payment(payment: &Payment) -> StorageResult<()> {
    for (column, value) in [
        ("payment.amount", payment.amount),
        ("payment.delivery_cost", payment.delivery_cost),
        ("payment.goods_total", payment.goods_total),
        ("payment.custom_fee", payment.custom_fee),
    ] {
        if value < 0 {
            return Err(StorageError::ConstraintViolation {
                constraint: format!("{column}_non_negative"),
                reason: format!("{column} = {value}"),
            });
        }
    }
    Ok(())
}

/// Item counterpart of [`check_payment`].
pub fn check_item(item: &Item) -> StorageResult<()> {
    for (column, value) in [("items.price", item.price), ("items.total_price", item.total_price)] {
        if value < 0 {
            return Err(StorageError::ConstraintViolation {
                constraint: format!("{column}_non_negative"),
                reason: format!("{column} = {value}"),
            });
        }
    }
    if !(0..=100).contains(&item.sale) {
        return Err(StorageError::ConstraintViolation {
            constraint: "items.sale_range".to_string(),
            reason: format!("items.sale = {}", item.sale),
        });
    }
    Ok(())
}
