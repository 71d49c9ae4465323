//! PostgreSQL Store Adapter
//!
//! [`PgStore`] implements [`StoreAdapter`] over a deadpool connection pool.
//! `write_order` opens one transaction, drives it with [`write_order_with`]
//! through a [`PgOrderWriter`], and either commits or rolls back. A replay
//! of a stored `order_uid` is rolled back as well. A panic
//! inside the sequence is caught, the transaction is rolled back, and the
//! caller gets `StorageError::TransactionFailed`.
//!
//! Content-addressed rows are upserted with
//! `INSERT ... ON CONFLICT (content_hash) DO NOTHING RETURNING id`, followed by
//! a lookup in a separate statement when the insert lost. Under READ COMMITTED
//! the second statement sees the winner's committed row.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime, Timeouts,
    Transaction,
};
use futures_util::FutureExt;
use orderflow_core::{
    content_hash_hex, Delivery, EntityType, Item, Order, OrderId, OrderflowError,
    OrderflowResult, Payment, RowId, StorageError,
};
use orderflow_storage::{
    write_order_with, ExistingOrder, OrderWriter, StorageResult, StoreAdapter, UpsertOutcome,
    WriteOutcome,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::config::DbConfig;
use crate::telemetry::metrics;

// ============================================================================
// SCHEMA
// ============================================================================

/// Idempotent DDL for the four tables.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS delivery (
    id           BIGSERIAL PRIMARY KEY,
    content_hash TEXT NOT NULL UNIQUE,
    name         TEXT NOT NULL,
    phone        TEXT NOT NULL,
    zip          TEXT NOT NULL,
    city         TEXT NOT NULL,
    address      TEXT NOT NULL,
    region       TEXT NOT NULL,
    email        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payment (
    id            BIGSERIAL PRIMARY KEY,
    content_hash  TEXT NOT NULL UNIQUE,
    transaction   TEXT NOT NULL,
    request_id    TEXT NOT NULL,
    currency      TEXT NOT NULL,
    provider      TEXT NOT NULL,
    amount        BIGINT NOT NULL CONSTRAINT payment_amount_non_negative CHECK (amount >= 0),
    payment_dt    BIGINT NOT NULL,
    bank          TEXT NOT NULL,
    delivery_cost BIGINT NOT NULL CONSTRAINT payment_delivery_cost_non_negative CHECK (delivery_cost >= 0),
    goods_total   BIGINT NOT NULL CONSTRAINT payment_goods_total_non_negative CHECK (goods_total >= 0),
    custom_fee    BIGINT NOT NULL CONSTRAINT payment_custom_fee_non_negative CHECK (custom_fee >= 0)
);

CREATE TABLE IF NOT EXISTS items (
    id           BIGSERIAL PRIMARY KEY,
    content_hash TEXT NOT NULL UNIQUE,
    chrt_id      BIGINT NOT NULL,
    track_number TEXT NOT NULL,
    price        BIGINT NOT NULL CONSTRAINT items_price_non_negative CHECK (price >= 0),
    rid          TEXT NOT NULL,
    name         TEXT NOT NULL,
    sale         BIGINT NOT NULL CONSTRAINT items_sale_range CHECK (sale BETWEEN 0 AND 100),
    size         TEXT NOT NULL,
    total_price  BIGINT NOT NULL CONSTRAINT items_total_price_non_negative CHECK (total_price >= 0),
    nm_id        BIGINT NOT NULL,
    brand        TEXT NOT NULL,
    status       BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS items_track_number_idx ON items (track_number, id);

CREATE TABLE IF NOT EXISTS orders (
    id                 BIGSERIAL PRIMARY KEY,
    order_uid          TEXT NOT NULL UNIQUE,
    track_number       TEXT NOT NULL,
    entry              TEXT NOT NULL,
    delivery_id        BIGINT NOT NULL REFERENCES delivery (id),
    payment_id         BIGINT NOT NULL REFERENCES payment (id),
    locale             TEXT NOT NULL,
    internal_signature TEXT NOT NULL,
    customer_id        TEXT NOT NULL,
    delivery_service   TEXT NOT NULL,
    shardkey           TEXT NOT NULL,
    sm_id              BIGINT NOT NULL,
    date_created       TEXT NOT NULL,
    oof_shard          TEXT NOT NULL
);
"#;

// ============================================================================
// POOL
// ============================================================================

impl DbConfig {
    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> OrderflowResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig {
            max_size: self.max_size,
            timeouts: Timeouts {
                wait: Some(self.timeout()),
                create: Some(self.timeout()),
                recycle: Some(self.timeout()),
            },
            ..PoolConfig::default()
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| OrderflowError::Connection {
                backend: "postgres".to_string(),
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

fn pool_error(e: PoolError) -> StorageError {
    StorageError::Connection {
        reason: e.to_string(),
    }
}

/// Map a driver error raised while writing `entity_type`.
fn write_error(entity_type: EntityType, e: tokio_postgres::Error) -> StorageError {
    if let Some(db) = e.as_db_error() {
        let code = db.code();
        if *code == SqlState::CHECK_VIOLATION
            || *code == SqlState::UNIQUE_VIOLATION
            || *code == SqlState::FOREIGN_KEY_VIOLATION
            || *code == SqlState::NOT_NULL_VIOLATION
        {
            return StorageError::ConstraintViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
                reason: db.message().to_string(),
            };
        }
    }
    if e.is_closed() {
        return StorageError::Connection {
            reason: e.to_string(),
        };
    }
    StorageError::InsertFailed {
        entity_type,
        reason: e.to_string(),
    }
}

fn read_error(e: tokio_postgres::Error) -> StorageError {
    if e.is_closed() {
        StorageError::Connection {
            reason: e.to_string(),
        }
    } else {
        StorageError::TransactionFailed {
            reason: e.to_string(),
        }
    }
}

fn not_found(entity_type: EntityType, id: impl ToString) -> StorageError {
    StorageError::NotFound {
        entity_type,
        id: id.to_string(),
    }
}

fn observe(operation: &str, success: bool, start: Instant) {
    if let Some(m) = metrics() {
        m.record_db_operation(operation, success, start.elapsed().as_secs_f64());
    }
}

// ============================================================================
// TRANSACTION WRITER
// ============================================================================

/// [`OrderWriter`] bound to one open transaction.
pub struct PgOrderWriter<'a> {
    tx: &'a Transaction<'a>,
}

impl<'a> PgOrderWriter<'a> {
    pub fn new(tx: &'a Transaction<'a>) -> Self {
        Self { tx }
    }

    /// Run a content-addressed insert; fall back to a hash lookup if it lost.
    async fn insert_or_lookup(
        &self,
        entity_type: EntityType,
        insert: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
        lookup: &str,
        hash: &str,
    ) -> StorageResult<RowId> {
        let inserted = self
            .tx
            .query_opt(insert, params)
            .await
            .map_err(|e| write_error(entity_type, e))?;
        if let Some(row) = inserted {
            return row.try_get::<_, i64>(0).map_err(|e| write_error(entity_type, e));
        }

        let existing = self
            .tx
            .query_opt(lookup, &[&hash])
            .await
            .map_err(|e| write_error(entity_type, e))?;
        match existing {
            Some(row) => row.try_get::<_, i64>(0).map_err(|e| write_error(entity_type, e)),
            None => Err(StorageError::InsertFailed {
                entity_type,
                reason: format!("conflicting row for content hash {} vanished", hash),
            }),
        }
    }
}

#[async_trait]
impl<'a> OrderWriter for PgOrderWriter<'a> {
    async fn find_existing(&mut self, order_uid: &str) -> StorageResult<Option<ExistingOrder>> {
        let row = self
            .tx
            .query_opt(
                "SELECT id, delivery_id, payment_id FROM orders WHERE order_uid = $1",
                &[&order_uid],
            )
            .await
            .map_err(|e| write_error(EntityType::Order, e))?;
        row.map(|row| -> StorageResult<ExistingOrder> {
            Ok(ExistingOrder {
                id: row.try_get(0).map_err(|e| write_error(EntityType::Order, e))?,
                delivery_id: row.try_get(1).map_err(|e| write_error(EntityType::Order, e))?,
                payment_id: row.try_get(2).map_err(|e| write_error(EntityType::Order, e))?,
            })
        })
        .transpose()
    }

    async fn upsert_delivery(&mut self, delivery: &Delivery) -> StorageResult<RowId> {
        let hash = content_hash_hex(&delivery.fingerprint());
        self.insert_or_lookup(
            EntityType::Delivery,
            "INSERT INTO delivery (content_hash, name, phone, zip, city, address, region, email) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (content_hash) DO NOTHING RETURNING id",
            &[
                &hash,
                &delivery.name,
                &delivery.phone,
                &delivery.zip,
                &delivery.city,
                &delivery.address,
                &delivery.region,
                &delivery.email,
            ],
            "SELECT id FROM delivery WHERE content_hash = $1",
            &hash,
        )
        .await
    }

    async fn upsert_payment(&mut self, payment: &Payment) -> StorageResult<RowId> {
        let hash = content_hash_hex(&payment.fingerprint());
        self.insert_or_lookup(
            EntityType::Payment,
            "INSERT INTO payment (content_hash, transaction, request_id, currency, provider, amount, \
             payment_dt, bank, delivery_cost, goods_total, custom_fee) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (content_hash) DO NOTHING RETURNING id",
            &[
                &hash,
                &payment.transaction,
                &payment.request_id,
                &payment.currency,
                &payment.provider,
                &payment.amount,
                &payment.payment_dt,
                &payment.bank,
                &payment.delivery_cost,
                &payment.goods_total,
                &payment.custom_fee,
            ],
            "SELECT id FROM payment WHERE content_hash = $1",
            &hash,
        )
        .await
    }

    async fn upsert_item(&mut self, item: &Item) -> StorageResult<RowId> {
        let hash = content_hash_hex(&item.fingerprint());
        self.insert_or_lookup(
            EntityType::Item,
            "INSERT INTO items (content_hash, chrt_id, track_number, price, rid, name, sale, size, \
             total_price, nm_id, brand, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (content_hash) DO NOTHING RETURNING id",
            &[
                &hash,
                &item.chrt_id,
                &item.track_number,
                &item.price,
                &item.rid,
                &item.name,
                &item.sale,
                &item.size,
                &item.total_price,
                &item.nm_id,
                &item.brand,
                &item.status,
            ],
            "SELECT id FROM items WHERE content_hash = $1",
            &hash,
        )
        .await
    }

    async fn upsert_order(&mut self, order: &Order) -> StorageResult<UpsertOutcome> {
        let inserted = self
            .tx
            .query_opt(
                "INSERT INTO orders (order_uid, track_number, entry, delivery_id, payment_id, locale, \
                 internal_signature, customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
                 ON CONFLICT (order_uid) DO NOTHING RETURNING id",
                &[
                    &order.order_uid,
                    &order.track_number,
                    &order.entry,
                    &order.delivery.id,
                    &order.payment.id,
                    &order.locale,
                    &order.internal_signature,
                    &order.customer_id,
                    &order.delivery_service,
                    &order.shardkey,
                    &order.sm_id,
                    &order.date_created,
                    &order.oof_shard,
                ],
            )
            .await
            .map_err(|e| write_error(EntityType::Order, e))?;

        if let Some(row) = inserted {
            let id: i64 = row
                .try_get(0)
                .map_err(|e| write_error(EntityType::Order, e))?;
            return Ok(UpsertOutcome::Inserted(id));
        }

        let row = self
            .tx
            .query_opt("SELECT id FROM orders WHERE order_uid = $1", &[&order.order_uid])
            .await
            .map_err(|e| write_error(EntityType::Order, e))?
            .ok_or_else(|| StorageError::InsertFailed {
                entity_type: EntityType::Order,
                reason: format!("conflicting order {} vanished", order.order_uid),
            })?;
        let id: i64 = row
            .try_get(0)
            .map_err(|e| write_error(EntityType::Order, e))?;
        Ok(UpsertOutcome::AlreadyExists(id))
    }
}

// ============================================================================
// STORE
// ============================================================================

/// PostgreSQL-backed [`StoreAdapter`].
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the pool and prove the database is reachable.
    ///
    /// Any failure is `OrderflowError::Connection`; the service must not start.
    pub async fn connect(config: &DbConfig) -> OrderflowResult<Self> {
        let store = Self::new(config.create_pool()?);
        store
            .ping()
            .await
            .map_err(|e| OrderflowError::Connection {
                backend: "postgres".to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(host = %config.host, port = config.port, dbname = %config.dbname, "Connected to PostgreSQL");
        Ok(store)
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        conn.batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| StorageError::TransactionFailed {
                reason: format!("schema bootstrap failed: {}", e),
            })
    }

    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn write_in_transaction(&self, order: &mut Order) -> StorageResult<WriteOutcome> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| StorageError::TransactionFailed {
                reason: format!("begin failed: {}", e),
            })?;

        let mut working = order.clone();
        let result = {
            let mut writer = PgOrderWriter::new(&tx);
            AssertUnwindSafe(write_order_with(&mut writer, &mut working))
                .catch_unwind()
                .await
        };

        match result {
            Ok(Ok(outcome)) if outcome.is_replay() => {
                // A writer that lost the order_uid race may have inserted
                // sub-entities; none of them belong to the stored order.
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback of replay failed");
                }
                *order = working;
                Ok(outcome)
            }
            Ok(Ok(outcome)) => {
                tx.commit()
                    .await
                    .map_err(|e| StorageError::TransactionFailed {
                        reason: format!("commit failed: {}", e),
                    })?;
                *order = working;
                Ok(outcome)
            }
            Ok(Err(e)) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
            Err(_) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback after panic failed");
                }
                Err(StorageError::TransactionFailed {
                    reason: "panic during write_order; transaction rolled back".to_string(),
                })
            }
        }
    }

    async fn read_in_connection(&self, id: OrderId) -> StorageResult<Order> {
        let conn = self.pool.get().await.map_err(pool_error)?;

        let row = conn
            .query_opt(
                "SELECT id, order_uid, track_number, entry, delivery_id, payment_id, locale, \
                 internal_signature, customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard \
                 FROM orders WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(read_error)?
            .ok_or_else(|| not_found(EntityType::Order, id))?;

        let delivery_id: i64 = row.try_get("delivery_id").map_err(read_error)?;
        let payment_id: i64 = row.try_get("payment_id").map_err(read_error)?;
        let track_number: String = row.try_get("track_number").map_err(read_error)?;

        let delivery_row = conn
            .query_opt(
                "SELECT id, name, phone, zip, city, address, region, email FROM delivery WHERE id = $1",
                &[&delivery_id],
            )
            .await
            .map_err(read_error)?
            .ok_or_else(|| not_found(EntityType::Delivery, delivery_id))?;

        let payment_row = conn
            .query_opt(
                "SELECT id, transaction, request_id, currency, provider, amount, payment_dt, bank, \
                 delivery_cost, goods_total, custom_fee FROM payment WHERE id = $1",
                &[&payment_id],
            )
            .await
            .map_err(read_error)?
            .ok_or_else(|| not_found(EntityType::Payment, payment_id))?;

        let item_rows = conn
            .query(
                "SELECT id, chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, \
                 brand, status FROM items WHERE track_number = $1 ORDER BY id",
                &[&track_number],
            )
            .await
            .map_err(read_error)?;

        Ok(Order {
            id: row.try_get("id").map_err(read_error)?,
            order_uid: row.try_get("order_uid").map_err(read_error)?,
            track_number,
            entry: row.try_get("entry").map_err(read_error)?,
            delivery: delivery_from_row(&delivery_row).map_err(read_error)?,
            payment: payment_from_row(&payment_row).map_err(read_error)?,
            items: item_rows
                .iter()
                .map(item_from_row)
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_error)?,
            locale: row.try_get("locale").map_err(read_error)?,
            internal_signature: row.try_get("internal_signature").map_err(read_error)?,
            customer_id: row.try_get("customer_id").map_err(read_error)?,
            delivery_service: row.try_get("delivery_service").map_err(read_error)?,
            shardkey: row.try_get("shardkey").map_err(read_error)?,
            sm_id: row.try_get("sm_id").map_err(read_error)?,
            date_created: row.try_get("date_created").map_err(read_error)?,
            oof_shard: row.try_get("oof_shard").map_err(read_error)?,
        })
    }
}

fn delivery_from_row(row: &Row) -> Result<Delivery, tokio_postgres::Error> {
    Ok(Delivery {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        zip: row.try_get("zip")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        region: row.try_get("region")?,
        email: row.try_get("email")?,
    })
}

fn payment_from_row(row: &Row) -> Result<Payment, tokio_postgres::Error> {
    Ok(Payment {
        id: row.try_get("id")?,
        transaction: row.try_get("transaction")?,
        request_id: row.try_get("request_id")?,
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        amount: row.try_get("amount")?,
        payment_dt: row.try_get("payment_dt")?,
        bank: row.try_get("bank")?,
        delivery_cost: row.try_get("delivery_cost")?,
        goods_total: row.try_get("goods_total")?,
        custom_fee: row.try_get("custom_fee")?,
    })
}

fn item_from_row(row: &Row) -> Result<Item, tokio_postgres::Error> {
    Ok(Item {
        id: row.try_get("id")?,
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

#[async_trait]
impl StoreAdapter for PgStore {
    async fn write_order(&self, order: &mut Order) -> StorageResult<WriteOutcome> {
        let start = Instant::now();
        let result = self.write_in_transaction(order).await;
        observe("write_order", result.is_ok(), start);
        if let Err(e) = &result {
            tracing::warn!(order_uid = %order.order_uid, error = %e, "Order transaction rolled back");
        }
        result
    }

    async fn read_order(&self, id: OrderId) -> StorageResult<Order> {
        let start = Instant::now();
        let result = self.read_in_connection(id).await;
        observe("read_order", result.is_ok(), start);
        result
    }

    async fn find_order_id(&self, order_uid: &str) -> StorageResult<Option<OrderId>> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let row = conn
            .query_opt("SELECT id FROM orders WHERE order_uid = $1", &[&order_uid])
            .await
            .map_err(read_error)?;
        row.map(|r| r.try_get::<_, i64>(0))
            .transpose()
            .map_err(read_error)
    }

    async fn ping(&self) -> StorageResult<()> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        conn.query_one("SELECT 1", &[]).await.map_err(read_error)?;
        Ok(())
    }
}
