//! Worker pool: leases order jobs from the queue and drives each through the
//! execution state machine, mutating the store and publishing every
//! transition to the connection registry.
//!
//! Per-attempt protocol:
//!
//! ```text
//! routing  -> best_route()            (quotes both venues concurrently)
//! building -> dex_used pinned, 500 ms transaction assembly
//! submitted
//! execute_swap()                       (may fail with NetworkCongestion)
//! confirmed (tx_hash, executed_price, amount_out)
//! ```
//!
//! Every store write happens before its publication, so a reconnecting client
//! always finds a persisted status at least as advanced as what it last saw
//! on the stream. A failed attempt leaves the order at whatever intermediate
//! status last succeeded; the retry re-enters at `routing` and the client
//! sees the sequence again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use dexec_queue::{FailOutcome, FailureKind, JobQueue, LeasedJob};
use dexec_registry::ConnectionRegistry;
use dexec_router::{DexRouter, RouterError};
use dexec_schemas::{OrderStatus, OrderType};
use dexec_store::{OrderPatch, OrderStore, StoreError};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall-clock seam. Post-mortem timestamps come from here so failure
/// scenarios can assert exact values.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the instant it was built with.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pool size. Matches the queue's concurrency cap: the cap is enforced by
    /// the queue, the pool size just avoids idle workers beyond it.
    pub workers: usize,
    /// Sleep between empty reserve polls.
    pub poll_interval: Duration,
    /// Simulated transaction-assembly delay in the `building` state.
    pub build_delay: Duration,
    /// How long a terminal order's stream stays open after the last frame.
    pub terminal_close_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: dexec_queue::CONCURRENCY,
            poll_interval: Duration::from_millis(100),
            build_delay: Duration::from_millis(500),
            terminal_close_grace: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptError
// ---------------------------------------------------------------------------

/// Failure of a single processing attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Execution(#[from] RouterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
}

impl AttemptError {
    /// Fatal failures burn the job's remaining attempts immediately.
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Execution(_) => FailureKind::Retryable,
            Self::Store(e) if e.is_transient() => FailureKind::Retryable,
            Self::Store(_) | Self::IllegalTransition { .. } => FailureKind::Fatal,
        }
    }
}

// ---------------------------------------------------------------------------
// PostMortem
// ---------------------------------------------------------------------------

/// Structured evidence recorded when an order fails terminally. Persisted in
/// compressed form in the order's `error` column and emitted as the final
/// stream frame.
#[derive(Debug, Clone, Serialize)]
pub struct PostMortem {
    pub order_id: Uuid,
    pub error: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub timestamp: DateTime<Utc>,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub order_type: OrderType,
}

impl PostMortem {
    /// The persisted error format: `<message> | Attempts: N/M | Failed at: <ts>`.
    pub fn to_error_string(&self) -> String {
        format!(
            "{} | Attempts: {}/{} | Failed at: {}",
            self.error,
            self.attempts,
            self.max_attempts,
            self.timestamp.to_rfc3339()
        )
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    store: Arc<dyn OrderStore>,
    queue: Arc<JobQueue>,
    router: Arc<DexRouter>,
    registry: ConnectionRegistry,
    clock: Arc<dyn Clock>,
    cfg: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn OrderStore>,
        queue: Arc<JobQueue>,
        router: Arc<DexRouter>,
        registry: ConnectionRegistry,
        clock: Arc<dyn Clock>,
        cfg: WorkerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue,
            router,
            registry,
            clock,
            cfg,
        })
    }

    /// Spawn the pool. Workers drain until the token is cancelled; an
    /// in-flight attempt always runs to completion (success, retry
    /// scheduling, or post-mortem) before its worker exits.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.cfg.workers)
            .map(|idx| {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.worker_loop(idx, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, idx: usize, shutdown: CancellationToken) {
        info!(worker = idx, "worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.queue.reserve() {
                Some(job) => self.process(job).await,
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.cfg.poll_interval) => {}
                    }
                }
            }
        }
        info!(worker = idx, "worker stopped");
    }

    /// Drive one leased attempt to a disposition.
    pub async fn process(&self, job: LeasedJob) {
        let attempt = job.attempts_made + 1;
        info!(order_id = %job.job_id, attempt, "processing order");

        match self.run_attempt(&job).await {
            Ok(()) => {
                self.queue.complete(job.job_id);
                info!(order_id = %job.job_id, attempt, "order confirmed");
            }
            Err(err) => self.handle_failure(&job, err).await,
        }
    }

    async fn run_attempt(&self, job: &LeasedJob) -> Result<(), AttemptError> {
        let order = &job.order;
        let id = job.job_id;

        // routing: pick the venue.
        self.transition(id, OrderStatus::Routing, OrderPatch::status(OrderStatus::Routing), None)
            .await?;
        let route = self
            .router
            .best_route(&order.token_in, &order.token_out, order.amount_in)
            .await;
        info!(order_id = %id, reason = %route.reason, "routing decision");

        // building: the venue is pinned from here on.
        self.transition(
            id,
            OrderStatus::Building,
            OrderPatch::status(OrderStatus::Building).with_dex(route.selected_dex),
            Some(json!({ "dex_used": route.selected_dex })),
        )
        .await?;
        tokio::time::sleep(self.cfg.build_delay).await;

        // submitted: hand off to the venue.
        self.transition(
            id,
            OrderStatus::Submitted,
            OrderPatch::status(OrderStatus::Submitted),
            None,
        )
        .await?;
        let exec = self
            .router
            .execute_swap(
                route.selected_dex,
                order.amount_in,
                route.quote.amount_out,
                order.slippage,
            )
            .await?;

        // confirmed: persist the fill, then publish it.
        self.transition(
            id,
            OrderStatus::Confirmed,
            OrderPatch::status(OrderStatus::Confirmed).with_execution(
                exec.tx_hash.clone(),
                exec.executed_price,
                exec.amount_out,
            ),
            Some(json!({
                "dex_used": route.selected_dex,
                "tx_hash": exec.tx_hash,
                "executed_price": exec.executed_price,
                "amount_out": exec.amount_out,
            })),
        )
        .await?;
        self.registry.close_after(id, self.cfg.terminal_close_grace);

        Ok(())
    }

    /// Store write first, publication second.
    async fn transition(
        &self,
        order_id: Uuid,
        to: OrderStatus,
        patch: OrderPatch,
        data: Option<serde_json::Value>,
    ) -> Result<(), AttemptError> {
        if let Some(current) = self.store.get(order_id).await?.map(|o| o.status) {
            if !current.can_transition_to(to) {
                return Err(AttemptError::IllegalTransition { from: current, to });
            }
        }
        self.store.update(order_id, patch).await?;
        self.registry.publish(order_id, to, data).await;
        Ok(())
    }

    async fn handle_failure(&self, job: &LeasedJob, err: AttemptError) {
        let kind = err.failure_kind();
        match self.queue.fail(job.job_id, &err.to_string(), kind) {
            FailOutcome::Scheduled {
                next_attempt,
                delay,
            } => {
                // Not final: the order keeps its last persisted status and the
                // queue re-runs the machine from routing after the backoff.
                warn!(
                    order_id = %job.job_id,
                    next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; retry scheduled"
                );
            }
            FailOutcome::Exhausted { attempts } => {
                self.record_post_mortem(job, &err, attempts).await;
            }
        }
    }

    /// Terminal failure: persist the post-mortem, publish the `failed` frame,
    /// and close the stream after the grace period.
    async fn record_post_mortem(&self, job: &LeasedJob, err: &AttemptError, attempts: u32) {
        let order = &job.order;
        let max_attempts = self.queue.config().max_attempts;
        let post_mortem = PostMortem {
            order_id: job.job_id,
            error: err.to_string(),
            attempts,
            max_attempts,
            timestamp: self.clock.now(),
            token_in: order.token_in.clone(),
            token_out: order.token_out.clone(),
            amount_in: order.amount_in,
            order_type: order.order_type,
        };

        error!(
            order_id = %post_mortem.order_id,
            attempts = post_mortem.attempts,
            max_attempts = post_mortem.max_attempts,
            error = %post_mortem.error,
            token_in = %post_mortem.token_in,
            token_out = %post_mortem.token_out,
            "order failed permanently"
        );

        let summary = post_mortem.to_error_string();
        let patch = OrderPatch::status(OrderStatus::Failed).with_error(summary.clone());
        if let Err(store_err) = self.store.update(job.job_id, patch).await {
            // Nothing left to escalate to; the stream frame still goes out.
            error!(order_id = %job.job_id, error = %store_err, "failed to persist post-mortem");
        }

        self.registry
            .publish(
                job.job_id,
                OrderStatus::Failed,
                Some(json!({
                    "error": summary,
                    "attempts": post_mortem.attempts,
                    "max_attempts": post_mortem.max_attempts,
                    "timestamp": post_mortem.timestamp,
                })),
            )
            .await;
        self.registry
            .close_after(job.job_id, self.cfg.terminal_close_grace);
    }
}
