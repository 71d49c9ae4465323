//! PostgreSQL store tests. Run with `--features db-tests` against a database
//! configured through the usual `ORDERFLOW_DB_*` variables.
#![cfg(feature = "db-tests")]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use orderflow_api::{AppConfig, DbConfig, PgStore};
use orderflow_core::{OrderflowResult, StorageError};
use orderflow_storage::StoreAdapter;
use orderflow_test_utils::fixtures::sample_order_with_uid;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique per test run so reruns against the same database do not replay.
fn unique(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}-{}", prefix, nanos, COUNTER.fetch_add(1, Ordering::Relaxed))
}

fn db_config() -> OrderflowResult<DbConfig> {
    let mut config = AppConfig::default();
    config.apply_env(&|name: &str| std::env::var(name).ok())?;
    Ok(config.db)
}

async fn test_store() -> OrderflowResult<PgStore> {
    let store = PgStore::connect(&db_config()?).await?;
    store.ensure_schema().await?;
    Ok(store)
}

#[tokio::test]
async fn test_redelivery_is_idempotent() -> OrderflowResult<()> {
    let store = test_store().await?;
    let uid = unique("pg-idem");

    let mut first = sample_order_with_uid(&uid);
    let outcome = store.write_order(&mut first).await?;
    assert!(!outcome.is_replay());

    let mut second = sample_order_with_uid(&uid);
    let replay = store.write_order(&mut second).await?;
    assert!(replay.is_replay());
    assert_eq!(replay.order_id(), outcome.order_id());
    assert_eq!(store.find_order_id(&uid).await?, Some(outcome.order_id()));
    Ok(())
}

#[tokio::test]
async fn test_identical_delivery_is_shared() -> OrderflowResult<()> {
    let store = test_store().await?;
    let delivery_name = unique("shared-delivery");

    let mut a = sample_order_with_uid(&unique("pg-share-a"));
    a.delivery.name = delivery_name.clone();
    let mut b = sample_order_with_uid(&unique("pg-share-b"));
    b.delivery.name = delivery_name;

    let wa = store.write_order(&mut a).await?;
    let wb = store.write_order(&mut b).await?;
    assert_ne!(wa.order_id(), wb.order_id());
    assert_eq!(wa.delivery_id, wb.delivery_id);
    Ok(())
}

#[tokio::test]
async fn test_check_violation_rolls_back_everything() -> OrderflowResult<()> {
    let store = test_store().await?;
    let uid = unique("pg-rollback");
    let delivery_name = unique("rolled-back-delivery");

    let mut order = sample_order_with_uid(&uid);
    order.delivery.name = delivery_name.clone();
    order.items[0].sale = 150;

    match store.write_order(&mut order).await {
        Err(StorageError::ConstraintViolation { constraint, .. }) => {
            assert_eq!(constraint, "items_sale_range");
        }
        other => panic!("expected a constraint violation, got {:?}", other),
    }
    assert_eq!(store.find_order_id(&uid).await?, None);

    let count = count_rows("SELECT count(*) FROM delivery WHERE name = $1", &delivery_name).await?;
    assert_eq!(count, 0, "delivery insert must roll back with the item");
    Ok(())
}

async fn count_rows(sql: &str, key: &str) -> OrderflowResult<i64> {
    let pool = db_config()?.create_pool()?;
    let conn = pool.get().await.expect("connection");
    let row = conn.query_one(sql, &[&key]).await.expect("count");
    Ok(row.get(0))
}

#[tokio::test]
async fn test_concurrent_writers_share_one_delivery() -> OrderflowResult<()> {
    let store = test_store().await?;
    let delivery_name = unique("raced-delivery");
    let transaction = unique("raced-tx");

    let mut a = sample_order_with_uid(&unique("pg-race-a"));
    let mut b = sample_order_with_uid(&unique("pg-race-b"));
    for order in [&mut a, &mut b] {
        order.delivery.name = delivery_name.clone();
        order.payment.transaction = transaction.clone();
    }

    let (wa, wb) = tokio::join!(store.write_order(&mut a), store.write_order(&mut b));
    let (wa, wb) = (wa?, wb?);
    assert!(!wa.is_replay() && !wb.is_replay());
    assert_ne!(wa.order_id(), wb.order_id());
    assert_eq!(wa.delivery_id, wb.delivery_id);
    assert_eq!(wa.payment_id, wb.payment_id);

    assert_eq!(
        count_rows("SELECT count(*) FROM delivery WHERE name = $1", &delivery_name).await?,
        1
    );
    assert_eq!(
        count_rows("SELECT count(*) FROM payment WHERE transaction = $1", &transaction).await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_changed_replay_writes_nothing() -> OrderflowResult<()> {
    let store = test_store().await?;
    let uid = unique("pg-replay");

    let mut first = sample_order_with_uid(&uid);
    let original = store.write_order(&mut first).await?;

    let mallory = unique("mallory");
    let mut replay = sample_order_with_uid(&uid);
    replay.delivery.name = mallory.clone();
    replay.items[0].chrt_id = 4242;
    let outcome = store.write_order(&mut replay).await?;
    assert!(outcome.is_replay());
    assert_eq!(outcome.order_id(), original.order_id());

    assert_eq!(
        count_rows("SELECT count(*) FROM delivery WHERE name = $1", &mallory).await?,
        0
    );
    let read = store.read_order(original.order_id()).await?;
    assert!(read.items.iter().all(|item| item.chrt_id != 4242));
    Ok(())
}

#[tokio::test]
async fn test_read_binds_items_by_track_number() -> OrderflowResult<()> {
    let store = test_store().await?;
    let track = unique("TRK");

    let mut order = sample_order_with_uid(&unique("pg-read"));
    order.track_number = track.clone();
    for item in order.items.iter_mut() {
        item.track_number = track.clone();
    }
    let mut extra = order.items[0].clone();
    extra.chrt_id += 1;
    extra.rid = unique("rid");
    order.items.push(extra);

    let outcome = store.write_order(&mut order).await?;
    let read = store.read_order(outcome.order_id()).await?;

    assert_eq!(read.order_uid, order.order_uid);
    assert_eq!(read.items.len(), 2);
    assert!(read.items.iter().all(|i| i.track_number == track));
    assert!(read.items[0].id < read.items[1].id);
    assert_eq!(read.delivery, order.delivery);
    assert_eq!(read.payment, order.payment);
    Ok(())
}

#[tokio::test]
async fn test_unknown_id_is_not_found() -> OrderflowResult<()> {
    let store = test_store().await?;
    let err = store.read_order(i64::MAX).await.expect_err("no such order");
    assert!(matches!(err, StorageError::NotFound { .. }));
    Ok(())
}
