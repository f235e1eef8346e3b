//! Postgres integration tests for the order store.
//!
//! These run only when `DEXEC_DATABASE_URL` points at a reachable database;
//! otherwise each test logs a skip and returns. CI provides the database,
//! local runs usually exercise the memory store's unit tests instead.

use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

use dexec_schemas::{Dex, Order, OrderStatus, OrderType};
use dexec_store::{OrderPatch, OrderStore, PgOrderStore, StoreError};

const ENV_DB_URL: &str = "DEXEC_DATABASE_URL";

async fn test_store() -> Option<PgOrderStore> {
    let url = match std::env::var(ENV_DB_URL) {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: {ENV_DB_URL} not set");
            return None;
        }
    };
    Some(
        PgOrderStore::connect(&url)
            .await
            .expect("connect + migrate test database"),
    )
}

fn market_order() -> Order {
    Order::new(
        OrderType::Market,
        "SOL",
        "USDC",
        dec!(1.5),
        dec!(0.01),
        Utc::now(),
    )
}

#[tokio::test]
async fn save_get_round_trips_through_postgres() {
    let Some(store) = test_store().await else {
        return;
    };

    let order = market_order();
    store.save(&order).await.unwrap();

    let fetched = store.get(order.order_id).await.unwrap().unwrap();
    assert_eq!(fetched.order_id, order.order_id);
    assert_eq!(fetched.order_type, OrderType::Market);
    assert_eq!(fetched.status, OrderStatus::Pending);
    assert_eq!(fetched.amount_in, dec!(1.5));
    assert_eq!(fetched.token_in, "SOL");
    assert!(fetched.dex_used.is_none());
}

#[tokio::test]
async fn duplicate_save_maps_unique_violation_to_conflict() {
    let Some(store) = test_store().await else {
        return;
    };

    let order = market_order();
    store.save(&order).await.unwrap();

    let err = store.save(&order).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(id) if id == order.order_id));
}

#[tokio::test]
async fn coalesce_update_patches_only_supplied_fields() {
    let Some(store) = test_store().await else {
        return;
    };

    let order = market_order();
    store.save(&order).await.unwrap();

    store
        .update(
            order.order_id,
            OrderPatch::status(OrderStatus::Building).with_dex(Dex::Raydium),
        )
        .await
        .unwrap();

    let fetched = store.get(order.order_id).await.unwrap().unwrap();
    assert_eq!(fetched.status, OrderStatus::Building);
    assert_eq!(fetched.dex_used, Some(Dex::Raydium));
    assert!(fetched.tx_hash.is_none());
    assert!(fetched.error.is_none());
    assert!(fetched.updated_at >= order.updated_at);
}

#[tokio::test]
async fn update_unknown_id_is_noop_not_error() {
    let Some(store) = test_store().await else {
        return;
    };

    store
        .update(Uuid::new_v4(), OrderPatch::status(OrderStatus::Failed))
        .await
        .unwrap();
}

#[tokio::test]
async fn get_unknown_id_returns_none() {
    let Some(store) = test_store().await else {
        return;
    };

    assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
}
