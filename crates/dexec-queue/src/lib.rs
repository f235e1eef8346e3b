//! Durable job queue for order execution.
//!
//! This crate is the adapter in front of the queue backend: it owns the whole
//! observable contract: idempotent enqueue keyed by order id, leasing with
//! attempt counts, a rolling-window rate limit, a hard concurrency cap,
//! exponential retry backoff, and retention pruning of finished jobs. Workers
//! never rate-limit themselves; a job handed out by [`JobQueue::reserve`] is
//! allowed to run immediately.
//!
//! Ordering between distinct jobs is *not* part of the contract. The queue
//! pops in arrival order when it can, but backoff re-queues jobs behind
//! fresher ones, so only the rate/concurrency/backoff guarantees are
//! observable.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use dexec_schemas::Order;

// ---------------------------------------------------------------------------
// Contract constants
// ---------------------------------------------------------------------------

/// Max jobs the pool may begin processing per rolling window.
pub const MAX_THROUGHPUT: usize = 100;

/// Rolling window over which [`MAX_THROUGHPUT`] applies.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Max jobs in an active processing state at any instant.
pub const CONCURRENCY: usize = 10;

/// Total attempts per job (first attempt plus two retries).
pub const MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles per subsequent retry (1 s, 2 s, 4 s).
pub const BASE_DELAY: Duration = Duration::from_millis(1000);

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Tunables, defaulting to the contract constants. Tests shrink the windows;
/// production uses the defaults.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_throughput: usize,
    pub throughput_window: Duration,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Completed jobs are retained this long, or the last
    /// `completed_keep_last`, whichever yields less.
    pub completed_retention: Duration,
    pub completed_keep_last: usize,
    /// Failed jobs are retained this long.
    pub failed_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_throughput: MAX_THROUGHPUT,
            throughput_window: THROUGHPUT_WINDOW,
            concurrency: CONCURRENCY,
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
            completed_retention: Duration::from_secs(3600),
            completed_keep_last: 100,
            failed_retention: Duration::from_secs(7200),
        }
    }
}

// ---------------------------------------------------------------------------
// Results and leases
// ---------------------------------------------------------------------------

/// Outcome of an enqueue. `job_id == order_id`, so re-enqueueing an order
/// that is already queued or running is a duplicate, not a second job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    Created(Uuid),
    Duplicate(Uuid),
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Created(id) | Self::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// A job handed to a worker. Carries the order snapshot taken at intake and
/// the number of attempts already consumed (0 on the first lease).
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job_id: Uuid,
    pub order: Order,
    pub attempts_made: u32,
}

/// How a failed attempt should be classified.
///
/// `Fatal` failures (schema violations, panics) burn all remaining attempts
/// at once; `Retryable` failures consume one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Fatal,
}

/// Disposition decided by [`JobQueue::fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Another attempt is scheduled after `delay`.
    Scheduled { next_attempt: u32, delay: Duration },
    /// No attempts remain; the job is terminally failed.
    Exhausted { attempts: u32 },
}

/// Point-in-time counters for health checks and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Internal records
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum JobState {
    Queued { available_at: Instant },
    Active,
    Completed { at: Instant },
    Failed { at: Instant },
}

#[derive(Debug)]
struct JobRecord {
    order: Order,
    attempts_made: u32,
    state: JobState,
    error: Option<String>,
}

#[derive(Default)]
struct QueueInner {
    jobs: HashMap<Uuid, JobRecord>,
    /// Queued ids in arrival/re-queue order; reserve scans for the first one
    /// whose backoff has elapsed.
    queued: VecDeque<Uuid>,
    /// Processing start times inside the rolling throughput window.
    starts: VecDeque<Instant>,
    active: usize,
    /// Completion order, oldest first, for the keep-last retention bound.
    completed_order: VecDeque<Uuid>,
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

/// Process-wide job queue handle. Cheap to share behind an `Arc`; all methods
/// take `&self` and never hold the lock across an await point (there are no
/// await points; the backend round-trips the real service would make are the
/// lock acquisitions here).
pub struct JobQueue {
    cfg: QueueConfig,
    inner: Mutex<QueueInner>,
}

impl JobQueue {
    pub fn new(cfg: QueueConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    /// Enqueue an order for execution. Idempotent on `order_id`: if a job for
    /// this order is already queued, active, or retained, the call returns
    /// `Duplicate` and changes nothing.
    pub fn enqueue(&self, order: Order) -> EnqueueResult {
        let job_id = order.order_id;
        let mut inner = self.lock();

        if inner.jobs.contains_key(&job_id) {
            debug!(job_id = %job_id, "enqueue hit existing job");
            return EnqueueResult::Duplicate(job_id);
        }

        inner.jobs.insert(
            job_id,
            JobRecord {
                order,
                attempts_made: 0,
                state: JobState::Queued {
                    available_at: Instant::now(),
                },
                error: None,
            },
        );
        inner.queued.push_back(job_id);
        EnqueueResult::Created(job_id)
    }

    /// Lease the next eligible job, if the rate limit and concurrency cap
    /// allow one to start right now. `None` means "nothing to do yet"; the
    /// caller should poll again shortly.
    pub fn reserve(&self) -> Option<LeasedJob> {
        let now = Instant::now();
        let mut inner = self.lock();

        if inner.active >= self.cfg.concurrency {
            return None;
        }

        // Rolling window: drop starts that have aged out, then check budget.
        let window = self.cfg.throughput_window;
        while inner
            .starts
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            inner.starts.pop_front();
        }
        if inner.starts.len() >= self.cfg.max_throughput {
            return None;
        }

        // First queued job whose backoff has elapsed.
        let pos = inner.queued.iter().position(|id| {
            matches!(
                inner.jobs.get(id).map(|r| &r.state),
                Some(JobState::Queued { available_at }) if *available_at <= now
            )
        })?;
        let job_id = inner.queued.remove(pos).expect("position just found");

        inner.starts.push_back(now);
        inner.active += 1;
        let rec = inner.jobs.get_mut(&job_id).expect("queued id has a record");
        rec.state = JobState::Active;

        Some(LeasedJob {
            job_id,
            order: rec.order.clone(),
            attempts_made: rec.attempts_made,
        })
    }

    /// Mark an active job as done.
    pub fn complete(&self, job_id: Uuid) {
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(rec) = inner.jobs.get_mut(&job_id) {
            if matches!(rec.state, JobState::Active) {
                rec.attempts_made += 1;
                rec.state = JobState::Completed { at: now };
                inner.active = inner.active.saturating_sub(1);
                inner.completed_order.push_back(job_id);
            }
        }
        Self::prune(&mut inner, &self.cfg, now);
    }

    /// Record a failed attempt and decide its disposition: schedule a backoff
    /// retry when attempts remain and the failure is retryable, otherwise
    /// terminally fail the job.
    pub fn fail(&self, job_id: Uuid, error: &str, kind: FailureKind) -> FailOutcome {
        let now = Instant::now();
        let mut inner = self.lock();

        let Some(rec) = inner.jobs.get_mut(&job_id) else {
            // A pruned or unknown job has nothing left to retry.
            return FailOutcome::Exhausted { attempts: 0 };
        };

        rec.attempts_made += 1;
        rec.error = Some(error.to_string());
        let attempts = rec.attempts_made;

        let exhausted = kind == FailureKind::Fatal || attempts >= self.cfg.max_attempts;
        let outcome = if exhausted {
            rec.state = JobState::Failed { at: now };
            FailOutcome::Exhausted { attempts }
        } else {
            // 1 s, 2 s, 4 s: doubling per attempt already made.
            let delay = self.cfg.base_delay * 2u32.pow(attempts - 1);
            rec.state = JobState::Queued {
                available_at: now + delay,
            };
            inner.queued.push_back(job_id);
            FailOutcome::Scheduled {
                next_attempt: attempts + 1,
                delay,
            }
        };

        inner.active = inner.active.saturating_sub(1);
        Self::prune(&mut inner, &self.cfg, now);
        outcome
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let mut stats = QueueStats {
            active: inner.active,
            ..Default::default()
        };
        for rec in inner.jobs.values() {
            match rec.state {
                JobState::Queued { .. } => stats.queued += 1,
                JobState::Completed { .. } => stats.completed += 1,
                JobState::Failed { .. } => stats.failed += 1,
                JobState::Active => {}
            }
        }
        stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().expect("job queue poisoned")
    }

    /// Retention: completed jobs live for `completed_retention` or the last
    /// `completed_keep_last`, whichever yields less; failed jobs for
    /// `failed_retention`.
    fn prune(inner: &mut QueueInner, cfg: &QueueConfig, now: Instant) {
        while inner.completed_order.len() > cfg.completed_keep_last {
            if let Some(id) = inner.completed_order.pop_front() {
                inner.jobs.remove(&id);
            }
        }
        let completed_retention = cfg.completed_retention;
        let failed_retention = cfg.failed_retention;
        let expired: Vec<Uuid> = inner
            .jobs
            .iter()
            .filter_map(|(id, rec)| match rec.state {
                JobState::Completed { at }
                    if now.duration_since(at) >= completed_retention =>
                {
                    Some(*id)
                }
                JobState::Failed { at } if now.duration_since(at) >= failed_retention => {
                    Some(*id)
                }
                _ => None,
            })
            .collect();
        for id in expired {
            inner.jobs.remove(&id);
            inner.completed_order.retain(|c| *c != id);
        }
    }
}
