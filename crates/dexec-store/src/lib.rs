//! Order persistence.
//!
//! The [`OrderStore`] trait is the single seam the rest of the pipeline sees.
//! [`postgres::PgOrderStore`] is the production implementation (sqlx, embedded
//! migrations); [`memory::MemoryOrderStore`] backs tests and DB-less dev runs.
//!
//! Updates to a single `order_id` are serialized by both implementations:
//! Postgres via single-row atomic UPDATE, the memory store via its map lock.
//! Updates for distinct ids may proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use dexec_schemas::{Dex, Order, OrderStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors surfaced by a store.
///
/// `Transport` is transient and counts as an attempt failure; `Conflict` and
/// `Constraint` indicate a non-transient problem, so the job that hit them
/// must not be retried.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} already exists")]
    Conflict(Uuid),

    #[error("store transport error: {0}")]
    Transport(String),

    #[error("store constraint violation: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Transient errors are worth another attempt; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// ---------------------------------------------------------------------------
// OrderPatch
// ---------------------------------------------------------------------------

/// Partial update applied by `update`.
///
/// Every field only ever moves from null to a value, so a `None` here means
/// "leave as is". `updated_at` is refreshed on every applied patch.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub dex_used: Option<Dex>,
    pub executed_price: Option<Decimal>,
    pub amount_out: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_dex(mut self, dex: Dex) -> Self {
        self.dex_used = Some(dex);
        self
    }

    pub fn with_execution(
        mut self,
        tx_hash: impl Into<String>,
        executed_price: Decimal,
        amount_out: Decimal,
    ) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self.executed_price = Some(executed_price);
        self.amount_out = Some(amount_out);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ---------------------------------------------------------------------------
// OrderStore
// ---------------------------------------------------------------------------

/// Persistence contract for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order. Fails with [`StoreError::Conflict`] if the id is
    /// already present.
    async fn save(&self, order: &Order) -> Result<(), StoreError>;

    /// Apply a partial update and refresh `updated_at`.
    ///
    /// Silently a no-op when the id is unknown: a late-arriving update after
    /// a forced clean must not crash the worker that issued it.
    async fn update(&self, order_id: Uuid, patch: OrderPatch) -> Result<(), StoreError>;

    /// Fetch an order by id.
    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;
}

/// Apply a patch to an in-memory order representation.
///
/// Shared by the memory store and tests; the Postgres implementation does the
/// equivalent in SQL with `COALESCE`.
pub(crate) fn apply_patch(order: &mut Order, patch: OrderPatch, now: DateTime<Utc>) {
    if let Some(status) = patch.status {
        order.status = status;
    }
    if let Some(dex) = patch.dex_used {
        order.dex_used = Some(dex);
    }
    if let Some(price) = patch.executed_price {
        order.executed_price = Some(price);
    }
    if let Some(out) = patch.amount_out {
        order.amount_out = Some(out);
    }
    if let Some(hash) = patch.tx_hash {
        order.tx_hash = Some(hash);
    }
    if let Some(error) = patch.error {
        order.error = Some(error);
    }
    order.updated_at = now;
}
