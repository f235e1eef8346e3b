//! Axum router and all HTTP/WS handlers for dexec-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)`; the scenario tests in
//! `tests/` compose the bare router directly.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use dexec_schemas::{Order, OrderStatus, OrderType, StreamFrame};
use dexec_store::StoreError;

use crate::{
    api_types::{
        ErrorResponse, ExecuteOrderRequest, ExecuteOrderResponse, HealthResponse, QueueHealth,
    },
    state::AppState,
};

/// How long a stream opened onto an already-terminal order stays up after the
/// replayed terminal frame.
const TERMINAL_CLOSE_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/orders/execute", post(execute_order))
        .route("/api/orders/:order_id", get(get_order))
        .route("/api/orders/:order_id/stream", get(stream_order))
        .route("/api/health", get(health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// POST /api/orders/execute
// ---------------------------------------------------------------------------

pub(crate) async fn execute_order(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ExecuteOrderRequest>,
) -> Response {
    let req = match validate(body) {
        Ok(req) => req,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response();
        }
    };

    let order = Order::new(
        OrderType::Market,
        req.token_in,
        req.token_out,
        req.amount_in,
        req.slippage,
        Utc::now(),
    );

    if let Err(e) = st.store.save(&order).await {
        error!(order_id = %order.order_id, error = %e, "failed to persist order");
        let message = match e {
            StoreError::Conflict(_) => "Order id collision; please retry",
            _ => "Failed to persist order",
        };
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(message)),
        )
            .into_response();
    }

    let order_id = order.order_id;
    st.queue.enqueue(order);
    info!(order_id = %order_id, "order accepted and queued");

    (
        StatusCode::CREATED,
        Json(ExecuteOrderResponse {
            order_id,
            message: "Order accepted for execution".to_string(),
            websocket_url: format!("/api/orders/{order_id}/stream"),
            instructions: "Connect to websocketUrl to receive real-time status updates"
                .to_string(),
        }),
    )
        .into_response()
}

struct ValidatedRequest {
    token_in: String,
    token_out: String,
    amount_in: Decimal,
    slippage: Decimal,
}

fn validate(body: ExecuteOrderRequest) -> Result<ValidatedRequest, String> {
    match body.order_type.as_deref() {
        Some("market") => {}
        Some(_) => {
            return Err("Only market orders are supported in this implementation".to_string())
        }
        None => return Err("orderType is required".to_string()),
    }

    let token_in = body
        .token_in
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "tokenIn is required".to_string())?;
    let token_out = body
        .token_out
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "tokenOut is required".to_string())?;

    let amount_in = body
        .amount_in
        .ok_or_else(|| "amountIn is required".to_string())?;
    if amount_in <= Decimal::ZERO {
        return Err("amountIn must be a positive amount".to_string());
    }

    let slippage = body.slippage.unwrap_or(dec!(0.01));
    if slippage < Decimal::ZERO || slippage > Decimal::ONE {
        return Err("slippage must be between 0 and 1".to_string());
    }

    Ok(ValidatedRequest {
        token_in,
        token_out,
        amount_in,
        slippage,
    })
}

// ---------------------------------------------------------------------------
// GET /api/orders/:order_id
// ---------------------------------------------------------------------------

pub(crate) async fn get_order(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Response {
    match st.store.get(order_id).await {
        Ok(Some(order)) => (StatusCode::OK, Json(order)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Order not found")),
        )
            .into_response(),
        Err(e) => {
            error!(order_id = %order_id, error = %e, "order lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Order lookup failed")),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            timestamp: Utc::now(),
            queue: QueueHealth {
                active_connections: st.registry.count().await,
                jobs: st.queue.stats(),
            },
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /api/orders/:order_id/stream  (WebSocket)
// ---------------------------------------------------------------------------

pub(crate) async fn stream_order(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_order_stream(st, order_id, socket))
}

async fn handle_order_stream(st: Arc<AppState>, order_id: Uuid, mut socket: WebSocket) {
    let order = match st.store.get(order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            send_error_and_close(&mut socket, order_id, "Order not found").await;
            return;
        }
        Err(e) => {
            error!(order_id = %order_id, error = %e, "stream order lookup failed");
            send_error_and_close(&mut socket, order_id, "Order lookup failed").await;
            return;
        }
    };

    let (conn_id, mut rx) = st.registry.register(order_id).await;
    info!(order_id = %order_id, status = %order.status, "stream attached");

    // Anchor frame: the client's fixed point of reference. It goes through
    // the registry channel so it shares ordering with worker publications.
    st.registry
        .publish_frame(
            StreamFrame::status(order_id, order.status)
                .with_message(format!("Connected. Current status: {}", order.status)),
        )
        .await;

    // Late connect onto a finished order: replay the terminal frame with its
    // persisted data, then close after the grace period.
    if order.status.is_terminal() {
        st.registry.publish_frame(terminal_replay_frame(&order)).await;
        st.registry.close_after(order_id, TERMINAL_CLOSE_GRACE);
    }

    let (mut sink, mut source) = socket.split();
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Registry closed the stream (terminal grace elapsed).
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Inbound text/ping frames are ignored; the stream is one-way.
                Some(Ok(_)) => {}
            },
        }
    }

    st.registry.deregister(order_id, conn_id).await;
    info!(order_id = %order_id, "stream detached");
}

fn terminal_replay_frame(order: &Order) -> StreamFrame {
    let data = match order.status {
        OrderStatus::Confirmed => json!({
            "dex_used": order.dex_used,
            "tx_hash": order.tx_hash,
            "executed_price": order.executed_price,
            "amount_out": order.amount_out,
        }),
        _ => json!({ "error": order.error }),
    };
    StreamFrame::status(order.order_id, order.status).with_data(data)
}

async fn send_error_and_close(socket: &mut WebSocket, order_id: Uuid, message: &str) {
    let frame = StreamFrame::error(order_id, message);
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::Text(text)).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}
