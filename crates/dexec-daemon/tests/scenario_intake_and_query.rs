//! In-process scenario tests for the dexec-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot`; no network I/O required.

use std::sync::Arc;

use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot
use uuid::Uuid;

use dexec_daemon::{routes, state::AppState};
use dexec_queue::{JobQueue, QueueConfig};
use dexec_registry::ConnectionRegistry;
use dexec_schemas::OrderStatus;
use dexec_store::{MemoryOrderStore, OrderStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a fresh in-process state backed by the memory store.
fn make_state() -> Arc<AppState> {
    Arc::new(AppState::new(
        Arc::new(MemoryOrderStore::new()),
        Arc::new(JobQueue::new(QueueConfig::default())),
        ConnectionRegistry::new(),
    ))
}

/// Drive the router with a single request and return (status, body json).
async fn call(state: Arc<AppState>, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let resp = routes::build_router(state)
        .oneshot(req)
        .await
        .expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = serde_json::from_slice(&body).expect("body is not valid JSON");
    (status, json)
}

fn post_execute(body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri("/api/orders/execute")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_ok_with_queue_counters() {
    let (status, body) = call(make_state(), get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "dexec-daemon");
    assert_eq!(body["queue"]["active_connections"], 0);
    assert_eq!(body["queue"]["queued"], 0);
    assert_eq!(body["queue"]["active"], 0);
    assert!(body["timestamp"].is_string());
}

// ---------------------------------------------------------------------------
// POST /api/orders/execute — validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_market_order_type_is_rejected_with_the_exact_message() {
    let st = make_state();
    let (status, body) = call(
        Arc::clone(&st),
        post_execute(json!({
            "orderType": "limit",
            "tokenIn": "SOL",
            "tokenOut": "USDC",
            "amountIn": 1,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Only market orders are supported in this implementation"
    );
    // Nothing persisted, nothing enqueued.
    assert_eq!(st.queue.stats().queued, 0);
}

#[tokio::test]
async fn missing_fields_are_rejected_field_by_field() {
    let st = make_state();

    let (status, body) = call(
        Arc::clone(&st),
        post_execute(json!({
            "orderType": "market",
            "tokenOut": "USDC",
            "amountIn": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "tokenIn is required");

    let (status, body) = call(
        Arc::clone(&st),
        post_execute(json!({
            "orderType": "market",
            "tokenIn": "SOL",
            "amountIn": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "tokenOut is required");

    let (status, body) = call(
        Arc::clone(&st),
        post_execute(json!({
            "orderType": "market",
            "tokenIn": "SOL",
            "tokenOut": "USDC",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "amountIn is required");

    assert_eq!(st.queue.stats().queued, 0);
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let (status, body) = call(
        make_state(),
        post_execute(json!({
            "orderType": "market",
            "tokenIn": "SOL",
            "tokenOut": "USDC",
            "amountIn": 0,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "amountIn must be a positive amount");
}

#[tokio::test]
async fn out_of_range_slippage_is_rejected() {
    let (status, body) = call(
        make_state(),
        post_execute(json!({
            "orderType": "market",
            "tokenIn": "SOL",
            "tokenOut": "USDC",
            "amountIn": 1,
            "slippage": 1.5,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "slippage must be between 0 and 1");
}

// ---------------------------------------------------------------------------
// POST /api/orders/execute — acceptance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_market_order_is_persisted_queued_and_answered_201() {
    let st = make_state();
    let (status, body) = call(
        Arc::clone(&st),
        post_execute(json!({
            "orderType": "market",
            "tokenIn": "SOL",
            "tokenOut": "USDC",
            "amountIn": 1,
            "slippage": 0.01,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let order_id: Uuid = body["orderId"].as_str().unwrap().parse().unwrap();
    assert_eq!(
        body["websocketUrl"],
        format!("/api/orders/{order_id}/stream")
    );
    assert!(body["message"].is_string());
    assert!(body["instructions"].is_string());

    // The store row exists with the client-facing symbol preserved.
    let stored = st.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.token_in, "SOL");
    assert_eq!(stored.token_out, "USDC");

    assert_eq!(st.queue.stats().queued, 1);
}

#[tokio::test]
async fn slippage_defaults_to_one_percent() {
    let st = make_state();
    let (status, body) = call(
        Arc::clone(&st),
        post_execute(json!({
            "orderType": "market",
            "tokenIn": "SOL",
            "tokenOut": "USDC",
            "amountIn": 2,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let order_id: Uuid = body["orderId"].as_str().unwrap().parse().unwrap();
    let stored = st.store.get(order_id).await.unwrap().unwrap();
    assert_eq!(stored.slippage.to_string(), "0.01");
}

#[tokio::test]
async fn snake_case_field_names_are_accepted_too() {
    let st = make_state();
    let (status, _) = call(
        Arc::clone(&st),
        post_execute(json!({
            "order_type": "market",
            "token_in": "SOL",
            "token_out": "USDC",
            "amount_in": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

// ---------------------------------------------------------------------------
// GET /api/orders/:order_id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn order_query_round_trips_the_stored_record() {
    let st = make_state();
    let (_, body) = call(
        Arc::clone(&st),
        post_execute(json!({
            "orderType": "market",
            "tokenIn": "SOL",
            "tokenOut": "USDC",
            "amountIn": 1,
        })),
    )
    .await;
    let order_id = body["orderId"].as_str().unwrap().to_string();

    let (status, body) = call(Arc::clone(&st), get(&format!("/api/orders/{order_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_id"], order_id);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["order_type"], "market");
    assert!(body["dex_used"].is_null());
    assert!(body["tx_hash"].is_null());
}

#[tokio::test]
async fn unknown_order_query_is_404() {
    let (status, body) = call(
        make_state(),
        get(&format!("/api/orders/{}", Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Order not found");
}
