//! Postgres-backed order store.
//!
//! Enum columns are stored as text and parsed on read; money columns are
//! `NUMERIC(20,8)` mapped to `rust_decimal::Decimal`. Partial updates go
//! through a single `COALESCE` UPDATE so per-id mutations are atomic at the
//! row level.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use async_trait::async_trait;

use dexec_schemas::Order;

use crate::{OrderPatch, OrderStore, StoreError};

/// Bounded connection pool; every operation acquires, uses, releases.
const MAX_CONNECTIONS: u32 = 20;

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Connect and run embedded migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Constraint(format!("migration failed: {e}")))?;

        info!(max_connections = MAX_CONNECTIONS, "order store connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared wiring).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Close the pool; part of graceful shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            insert into orders (
              order_id, order_type, token_in, token_out, amount_in, slippage,
              status, dex_used, executed_price, amount_out, tx_hash, error,
              created_at, updated_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            )
            "#,
        )
        .bind(order.order_id)
        .bind(order.order_type.as_str())
        .bind(&order.token_in)
        .bind(&order.token_out)
        .bind(order.amount_in)
        .bind(order.slippage)
        .bind(order.status.as_str())
        .bind(order.dex_used.map(|d| d.as_str()))
        .bind(order.executed_price)
        .bind(order.amount_out)
        .bind(order.tx_hash.as_deref())
        .bind(order.error.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::Conflict(order.order_id))
            }
            Err(e) => Err(map_sqlx_err(e)),
        }
    }

    async fn update(&self, order_id: Uuid, patch: OrderPatch) -> Result<(), StoreError> {
        // Patched fields only ever move null -> value, so COALESCE keeps the
        // existing value wherever the patch carries None. Zero rows affected
        // (unknown id) is deliberately not an error.
        sqlx::query(
            r#"
            update orders set
              status         = coalesce($2, status),
              dex_used       = coalesce($3, dex_used),
              executed_price = coalesce($4, executed_price),
              amount_out     = coalesce($5, amount_out),
              tx_hash        = coalesce($6, tx_hash),
              error          = coalesce($7, error),
              updated_at     = now()
            where order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.dex_used.map(|d| d.as_str()))
        .bind(patch.executed_price)
        .bind(patch.amount_out)
        .bind(patch.tx_hash.as_deref())
        .bind(patch.error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            select order_id, order_type, token_in, token_out, amount_in, slippage,
                   status, dex_used, executed_price, amount_out, tx_hash, error,
                   created_at, updated_at
            from orders
            where order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(Order::try_from).transpose()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: Uuid,
    order_type: String,
    token_in: String,
    token_out: String,
    amount_in: Decimal,
    slippage: Decimal,
    status: String,
    dex_used: Option<String>,
    executed_price: Option<Decimal>,
    amount_out: Option<Decimal>,
    tx_hash: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, StoreError> {
        Ok(Order {
            order_id: row.order_id,
            order_type: row.order_type.parse().map_err(StoreError::Constraint)?,
            token_in: row.token_in,
            token_out: row.token_out,
            amount_in: row.amount_in,
            slippage: row.slippage,
            status: row.status.parse().map_err(StoreError::Constraint)?,
            dex_used: row
                .dex_used
                .map(|d| d.parse().map_err(StoreError::Constraint))
                .transpose()?,
            executed_price: row.executed_price,
            amount_out: row.amount_out,
            tx_hash: row.tx_hash,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database-level failures (bad SQL, constraint trouble) are fatal for the
/// issuing job; everything else is transport and worth a retry.
fn map_sqlx_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) => StoreError::Constraint(db.to_string()),
        other => StoreError::Transport(other.to_string()),
    }
}
