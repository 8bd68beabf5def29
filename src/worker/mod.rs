//! Worker loop: claim a task, fetch, store, report.
//!
//! A worker holds no state that matters for correctness. Everything it
//! knows about a task lives in the catalog row it leased; if the process
//! dies mid-task, the reclaimer returns the row to `pending`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//! use harvester_core::{
//!     Database, FsStorageWriter, LeaseCoordinator, ThetaClient, Worker, WorkerConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(std::path::Path::new("tasks.db")).await?;
//! let retrieval = ThetaClient::new("http://localhost:25503", "5s", Duration::from_secs(60))?;
//! let storage = FsStorageWriter::new("./data", "5s");
//!
//! let worker = Worker::new(
//!     "worker-0",
//!     LeaseCoordinator::new(db),
//!     Arc::new(retrieval),
//!     Arc::new(storage),
//!     WorkerConfig::new(3),
//! );
//! worker.run(&AtomicBool::new(false)).await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::{TaskFailure, WorkerError};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{CatalogError, DbErrorKind, Task, TaskKey, TaskStatus};
use crate::lease::LeaseRepository;
use crate::retrieval::Retrieval;
use crate::storage::StorageWriter;

/// Default pause between polls when nothing is claimable.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// How often an idle sleep checks the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Tunables for a worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Attempts a task gets before a failure is terminal.
    pub max_retries: u32,
    /// Base pause between polls of an empty catalog. Up to a quarter of it
    /// is added as random jitter so idle workers do not poll in lockstep.
    pub idle_interval: Duration,
    /// Return from [`Worker::run`] the first time nothing is claimable.
    pub exit_when_drained: bool,
}

impl WorkerConfig {
    /// Creates a config with the given retry budget and default idle interval.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            exit_when_drained: false,
        }
    }
}

/// Result of one claim/execute/report cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Nothing was claimable (or the store was busy).
    Idle,
    /// The task was stored and completed.
    Completed {
        /// Task id.
        task_id: i64,
    },
    /// The attempt failed and the task went back to pending.
    Requeued {
        /// Task id.
        task_id: i64,
    },
    /// The attempt failed and the retry budget is exhausted.
    Failed {
        /// Task id.
        task_id: i64,
    },
    /// The result could not be recorded: the lease was lost to the reclaimer,
    /// or the store stayed locked. The row is left to its current holder or
    /// to the next reclaim.
    Abandoned {
        /// Task id.
        task_id: i64,
    },
}

/// Counters shared by one or more workers.
#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicUsize,
    requeued: AtomicUsize,
    failed: AtomicUsize,
    abandoned: AtomicUsize,
    idle_polls: AtomicUsize,
}

impl WorkerStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks completed.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of failed attempts that were requeued.
    #[must_use]
    pub fn requeued(&self) -> usize {
        self.requeued.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks that failed terminally.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks whose result could not be recorded.
    #[must_use]
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Returns the number of polls that found nothing to do.
    #[must_use]
    pub fn idle_polls(&self) -> usize {
        self.idle_polls.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.completed() + self.requeued() + self.failed() + self.abandoned()
    }

    fn record(&self, outcome: WorkOutcome) {
        let counter = match outcome {
            WorkOutcome::Idle => &self.idle_polls,
            WorkOutcome::Completed { .. } => &self.completed,
            WorkOutcome::Requeued { .. } => &self.requeued,
            WorkOutcome::Failed { .. } => &self.failed,
            WorkOutcome::Abandoned { .. } => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// One claimant. Run several, in one process or many, against the same store.
pub struct Worker<L> {
    name: String,
    lease: L,
    retrieval: Arc<dyn Retrieval>,
    storage: Arc<dyn StorageWriter>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl<L: LeaseRepository> Worker<L> {
    /// Creates a worker with its own stats.
    pub fn new(
        name: impl Into<String>,
        lease: L,
        retrieval: Arc<dyn Retrieval>,
        storage: Arc<dyn StorageWriter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            lease,
            retrieval,
            storage,
            config,
            stats: Arc::new(WorkerStats::new()),
        }
    }

    /// Replaces the stats tracker, to aggregate across workers.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Returns this worker's stats.
    #[must_use]
    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Runs one cycle.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Coordinator`] if the store fails or the
    /// coordinator reports a defect. A busy store during claim reports
    /// [`WorkOutcome::Idle`]. A lost lease or a busy store while reporting
    /// the result reports [`WorkOutcome::Abandoned`].
    #[instrument(skip(self), fields(worker = %self.name))]
    pub async fn process_next(&self) -> Result<WorkOutcome, WorkerError> {
        let task = match self.lease.claim_next(self.config.max_retries).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!("nothing to claim");
                return Ok(self.finish(WorkOutcome::Idle));
            }
            Err(err) if err.is_busy_or_locked() => {
                warn!(error = %err, "store busy during claim; backing off");
                return Ok(self.finish(WorkOutcome::Idle));
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            task_id = task.id,
            symbol = %task.key.symbol,
            expiration = %task.key.expiration,
            target_date = %task.key.target_date,
            retry_count = task.retry_count,
            lease_token = task.lease_token,
            "claimed task"
        );

        let outcome = match self.execute(&task.key).await {
            Ok(artifact) => match self
                .lease
                .mark_completed(task.id, task.lease_token, &artifact)
                .await
            {
                Ok(()) => {
                    info!(task_id = task.id, artifact = %artifact, "task completed");
                    WorkOutcome::Completed { task_id: task.id }
                }
                Err(err) => self.abandon(&task, "complete", err)?,
            },
            Err(failure) => self.report_failure(&task, &failure).await?,
        };
        Ok(self.finish(outcome))
    }

    /// Loops until `interrupted` is set.
    ///
    /// With `exit_when_drained`, also returns the first time nothing is
    /// claimable.
    ///
    /// # Errors
    ///
    /// Returns the first [`WorkerError`] from [`Worker::process_next`].
    #[instrument(skip(self, interrupted), fields(worker = %self.name))]
    pub async fn run(&self, interrupted: &AtomicBool) -> Result<(), WorkerError> {
        info!(max_retries = self.config.max_retries, "worker started");

        while !interrupted.load(Ordering::SeqCst) {
            if self.process_next().await? == WorkOutcome::Idle {
                if self.config.exit_when_drained {
                    info!("no claimable tasks; exiting");
                    break;
                }
                self.idle_sleep(interrupted).await;
            }
        }

        info!(
            completed = self.stats.completed(),
            requeued = self.stats.requeued(),
            failed = self.stats.failed(),
            abandoned = self.stats.abandoned(),
            "worker stopped"
        );
        Ok(())
    }

    async fn execute(&self, key: &TaskKey) -> Result<String, TaskFailure> {
        let payload = self.retrieval.fetch(key).await?;
        let artifact = self.storage.store(key, &payload).await?;
        Ok(artifact)
    }

    async fn report_failure(
        &self,
        task: &Task,
        failure: &TaskFailure,
    ) -> Result<WorkOutcome, WorkerError> {
        let message = failure.to_string();
        let status = match self
            .lease
            .mark_failed(task.id, task.lease_token, &message, self.config.max_retries)
            .await
        {
            Ok(status) => status,
            Err(err) => return self.abandon(task, "fail", err),
        };

        let attempts = task.retry_count + 1;
        if status == TaskStatus::Failed {
            warn!(
                task_id = task.id,
                class = failure.class(),
                attempts,
                error = %message,
                "task failed; retries exhausted"
            );
            Ok(WorkOutcome::Failed { task_id: task.id })
        } else {
            warn!(
                task_id = task.id,
                class = failure.class(),
                attempts,
                error = %message,
                "task attempt failed; requeued"
            );
            Ok(WorkOutcome::Requeued { task_id: task.id })
        }
    }

    /// Handles a report the coordinator refused.
    ///
    /// `InvalidTransition` here means this worker's lease was reclaimed and the
    /// row moved on without it; the attempt ends and the row stays as the
    /// coordinator left it. Busy stores and pool timeouts leave the lease for
    /// the reclaimer. Anything else stops the loop.
    fn abandon(
        &self,
        task: &Task,
        operation: &'static str,
        err: CatalogError,
    ) -> Result<WorkOutcome, WorkerError> {
        if let CatalogError::InvalidTransition { status, .. } = &err {
            error!(
                task_id = task.id,
                lease_token = task.lease_token,
                operation,
                current_status = %status,
                "lease lost before the result was recorded; abandoning task"
            );
        } else if err.is_busy_or_locked() || err.database_kind() == Some(DbErrorKind::PoolTimeout)
        {
            warn!(
                task_id = task.id,
                operation,
                error = %err,
                "store busy; result not recorded, leaving the lease to the reclaimer"
            );
        } else {
            return Err(err.into());
        }
        Ok(WorkOutcome::Abandoned { task_id: task.id })
    }

    fn finish(&self, outcome: WorkOutcome) -> WorkOutcome {
        self.stats.record(outcome);
        outcome
    }

    async fn idle_sleep(&self, interrupted: &AtomicBool) {
        let deadline = Instant::now() + with_jitter(self.config.idle_interval);
        while !interrupted.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(INTERRUPT_POLL)).await;
        }
    }
}

fn with_jitter(base: Duration) -> Duration {
    let max_jitter_ms = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
}
