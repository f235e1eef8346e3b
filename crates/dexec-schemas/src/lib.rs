//! Canonical data model shared by every dexec crate.
//!
//! Pure data: serde types, the order status graph, and the WebSocket frame
//! shape. No I/O and no async: the store, queue, router, worker, and daemon
//! all depend on this crate and nothing here depends on them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// OrderType
// ---------------------------------------------------------------------------

/// Supported order types.
///
/// `limit` and `sniper` are planned; intake rejects anything but `market`
/// until routing for them exists, so the enum carries a single variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(Self::Market),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Dex
// ---------------------------------------------------------------------------

/// The DEX backends the router can select between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dex {
    Raydium,
    Meteora,
}

impl Dex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raydium => "raydium",
            Self::Meteora => "meteora",
        }
    }
}

impl std::fmt::Display for Dex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raydium" => Ok(Self::Raydium),
            "meteora" => Ok(Self::Meteora),
            other => Err(format!("unknown dex: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Lifecycle states of an order.
///
/// The graph is strict and linear:
///
/// ```text
/// pending → routing → building → submitted → confirmed
///                                          ↘ failed
/// ```
///
/// `failed` is reachable from any non-terminal state. A retry restarts the
/// machine at `routing`, so `routing` is additionally re-enterable from
/// `routing`, `building`, and `submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Routing,
    Building,
    Submitted,
    Confirmed,
    Failed,
}

impl OrderStatus {
    /// Returns `true` once no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// Legal moves are the forward edges of the graph, `failed` from any
    /// non-terminal state, and the retry restart back to `routing`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Pending, Routing) => true,
            (Routing, Building) => true,
            (Building, Submitted) => true,
            (Submitted, Confirmed) => true,
            // Retry restart: a failed attempt re-enters the machine at routing.
            (Routing | Building | Submitted, Routing) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Routing => "routing",
            Self::Building => "building",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "routing" => Ok(Self::Routing),
            "building" => Ok(Self::Building),
            "submitted" => Ok(Self::Submitted),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// Canonical order record, as persisted by the store.
///
/// `tx_hash`, `executed_price`, and `amount_out` are set exactly when the
/// order reaches `confirmed`; `error` exactly when it reaches `failed`;
/// `dex_used` at the `routing → building` transition and never again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub order_type: OrderType,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub slippage: Decimal,
    pub status: OrderStatus,
    pub dex_used: Option<Dex>,
    pub executed_price: Option<Decimal>,
    pub amount_out: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a fresh `pending` order with a v4 id.
    pub fn new(
        order_type: OrderType,
        token_in: impl Into<String>,
        token_out: impl Into<String>,
        amount_in: Decimal,
        slippage: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            order_type,
            token_in: token_in.into(),
            token_out: token_out.into(),
            amount_in,
            slippage,
            status: OrderStatus::Pending,
            dex_used: None,
            executed_price: None,
            amount_out: None,
            tx_hash: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Quote / RouteResult
// ---------------------------------------------------------------------------

/// A single DEX quote. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub dex: Dex,
    pub price: Decimal,
    pub amount_out: Decimal,
    pub fee: Decimal,
    pub estimated_gas: Decimal,
}

/// Outcome of comparing quotes across backends.
///
/// `reason` is the human-readable transparency trace: both quotes' outputs
/// and the delta that decided the selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    pub selected_dex: Dex,
    pub quote: Quote,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// StreamFrame
// ---------------------------------------------------------------------------

/// A discrete JSON text frame on the order stream socket.
///
/// Top-level keys are camelCase on the wire (`orderId`); keys inside `data`
/// are snake_case (`dex_used`, `tx_hash`, …) as the workers build them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamFrame {
    /// A status-transition frame.
    pub fn status(order_id: Uuid, status: OrderStatus) -> Self {
        Self {
            order_id,
            status: Some(status),
            data: None,
            timestamp: Utc::now(),
            message: None,
            error: None,
        }
    }

    /// An error frame (e.g. stream opened for an unknown order).
    pub fn error(order_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            order_id,
            status: None,
            data: None,
            timestamp: Utc::now(),
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_graph_is_linear() {
        use OrderStatus::*;

        assert!(Pending.can_transition_to(Routing));
        assert!(Routing.can_transition_to(Building));
        assert!(Building.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Confirmed));

        // No skipping, no going backwards past routing.
        assert!(!Pending.can_transition_to(Building));
        assert!(!Routing.can_transition_to(Submitted));
        assert!(!Building.can_transition_to(Confirmed));
        assert!(!Submitted.can_transition_to(Pending));
    }

    #[test]
    fn failed_reachable_from_any_non_terminal_state() {
        use OrderStatus::*;

        for st in [Pending, Routing, Building, Submitted] {
            assert!(st.can_transition_to(Failed), "{st} -> failed must be legal");
        }
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn retry_restart_reenters_routing() {
        use OrderStatus::*;

        for st in [Routing, Building, Submitted] {
            assert!(st.can_transition_to(Routing), "{st} -> routing must be legal");
        }
        assert!(!Confirmed.can_transition_to(Routing));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        use OrderStatus::*;

        assert!(Confirmed.is_terminal());
        assert!(Failed.is_terminal());
        for next in [Pending, Routing, Building, Submitted, Confirmed, Failed] {
            assert!(!Confirmed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn new_order_starts_pending_with_nulls() {
        let now = Utc::now();
        let o = Order::new(OrderType::Market, "SOL", "USDC", dec!(1), dec!(0.01), now);

        assert_eq!(o.status, OrderStatus::Pending);
        assert!(o.dex_used.is_none());
        assert!(o.tx_hash.is_none());
        assert!(o.executed_price.is_none());
        assert!(o.amount_out.is_none());
        assert!(o.error.is_none());
        assert_eq!(o.created_at, o.updated_at);
    }

    #[test]
    fn frame_serializes_camel_case_order_id() {
        let id = Uuid::new_v4();
        let frame = StreamFrame::status(id, OrderStatus::Building)
            .with_data(serde_json::json!({"dex_used": "raydium"}));

        let v: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["orderId"], id.to_string());
        assert_eq!(v["status"], "building");
        assert_eq!(v["data"]["dex_used"], "raydium");
        assert!(v.get("message").is_none(), "unset fields are omitted");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn enums_round_trip_lowercase() {
        assert_eq!(serde_json::to_string(&Dex::Raydium).unwrap(), "\"raydium\"");
        assert_eq!(
            serde_json::to_string(&OrderStatus::Submitted).unwrap(),
            "\"submitted\""
        );
        assert_eq!(
            serde_json::from_str::<OrderType>("\"market\"").unwrap(),
            OrderType::Market
        );
        assert_eq!("meteora".parse::<Dex>().unwrap(), Dex::Meteora);
        assert_eq!(
            "confirmed".parse::<OrderStatus>().unwrap(),
            OrderStatus::Confirmed
        );
    }
}
