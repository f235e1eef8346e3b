//! Request and response bodies for the HTTP surface.
//!
//! The wire casing is camelCase (`orderId`, `websocketUrl`); intake also
//! accepts snake_case field names via serde aliases.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dexec_queue::QueueStats;

// ---------------------------------------------------------------------------
// POST /api/orders/execute
// ---------------------------------------------------------------------------

/// Raw intake body. Everything is optional here; `routes::validate` turns
/// this into a checked request or a 400 with a field-level message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOrderRequest {
    #[serde(default, alias = "order_type")]
    pub order_type: Option<String>,
    #[serde(default, alias = "token_in")]
    pub token_in: Option<String>,
    #[serde(default, alias = "token_out")]
    pub token_out: Option<String>,
    #[serde(default, alias = "amount_in")]
    pub amount_in: Option<Decimal>,
    #[serde(default)]
    pub slippage: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOrderResponse {
    pub order_id: Uuid,
    pub message: String,
    pub websocket_url: String,
    pub instructions: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub queue: QueueHealth,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub active_connections: usize,
    #[serde(flatten)]
    pub jobs: QueueStats,
}
