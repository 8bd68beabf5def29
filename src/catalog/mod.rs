//! Task catalog: persistent records of download-and-store tasks.
//!
//! The catalog is pure storage. It knows how to create tasks idempotently,
//! look them up, and count them. Lease transitions (`status`,
//! `lease_started_at`, `retry_count`, `artifact_reference`) belong to
//! [`crate::lease::LeaseCoordinator`]; the only other writers are the
//! operator resets at the bottom of this module.
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::{Catalog, Database, TaskKey};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("tasks.db")).await?;
//! let catalog = Catalog::new(db);
//!
//! let key = TaskKey::parse("SPXW", "2024-06-21", "2024-06-20")?;
//! catalog.create(&key).await?;
//! catalog.create(&key).await?; // no-op
//!
//! let counts = catalog.count_by_status().await?;
//! assert_eq!(counts.pending, 1);
//! # Ok(())
//! # }
//! ```

mod error;
mod task;

pub use error::{CatalogError, DbErrorKind};
pub use task::{StatusCounts, Task, TaskKey, TaskStatus};

pub(crate) use task::parse_date;

use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::db::Database;

/// Result type for catalog and lease operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Columns for the claim ordering predicate: newest data first.
pub(crate) const CLAIM_ORDER: &str = "expiration DESC, target_date DESC";

/// Handle to the task catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Database,
}

impl Catalog {
    /// Creates a catalog handle over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a pending task for `key`.
    ///
    /// Returns the new task id, or `None` when a task with the same identity
    /// already exists (the existing row is left untouched).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the insert fails.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn create(&self, key: &TaskKey) -> Result<Option<i64>> {
        let row = sqlx::query(
            r"INSERT INTO tasks (symbol, expiration, target_date, status, retry_count)
              VALUES (?, ?, ?, ?, 0)
              ON CONFLICT (symbol, expiration, target_date) DO NOTHING
              RETURNING id",
        )
        .bind(&key.symbol)
        .bind(key.expiration)
        .bind(key.target_date)
        .bind(TaskStatus::Pending.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        let id = row.map(|row| row.get::<i64, _>("id"));
        if id.is_none() {
            debug!("task already exists; create is a no-op");
        }
        Ok(id)
    }

    /// Inserts many tasks in one transaction.
    ///
    /// Returns how many were newly created; existing keys are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if any insert fails; nothing is
    /// committed in that case.
    #[instrument(skip(self, keys), fields(requested = keys.len()))]
    pub async fn create_many(&self, keys: &[TaskKey]) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;
        let mut created = 0;
        for key in keys {
            let result = sqlx::query(
                r"INSERT INTO tasks (symbol, expiration, target_date, status, retry_count)
                  VALUES (?, ?, ?, ?, 0)
                  ON CONFLICT (symbol, expiration, target_date) DO NOTHING",
            )
            .bind(&key.symbol)
            .bind(key.expiration)
            .bind(key.target_date)
            .bind(TaskStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();
        }
        tx.commit().await?;

        info!(created, skipped = keys.len() as u64 - created, "tasks created");
        Ok(created)
    }

    /// Looks a task up by identity.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::TaskNotFound`] if no task has this key.
    /// Returns [`CatalogError::Database`] if the query fails.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &TaskKey) -> Result<Task> {
        sqlx::query_as::<_, Task>(
            r"SELECT * FROM tasks
              WHERE symbol = ? AND expiration = ? AND target_date = ?",
        )
        .bind(&key.symbol)
        .bind(key.expiration)
        .bind(key.target_date)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| CatalogError::TaskNotFound(key.to_string()))
    }

    /// Looks a task up by id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(r"SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(task)
    }

    /// Counts tasks in every status.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self) -> Result<StatusCounts> {
        let rows = sqlx::query(r"SELECT status, COUNT(*) AS count FROM tasks GROUP BY status")
            .fetch_all(self.db.pool())
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let raw: String = row.get("status");
            let status = raw
                .parse::<TaskStatus>()
                .map_err(|_| CatalogError::invalid_status(&raw))?;
            counts.set(status, row.get("count"));
        }
        Ok(counts)
    }

    /// Lists tasks in a status, in claim order.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: TaskStatus, limit: u32) -> Result<Vec<Task>> {
        let sql = format!("SELECT * FROM tasks WHERE status = ? ORDER BY {CLAIM_ORDER} LIMIT ?");
        let tasks = sqlx::query_as::<_, Task>(&sql)
            .bind(status.as_str())
            .bind(i64::from(limit))
            .fetch_all(self.db.pool())
            .await?;

        Ok(tasks)
    }

    // ==================== Operator Interface ====================

    /// Returns one task to a fresh pending state, whatever its status.
    ///
    /// Operator recovery action: clears the retry budget, lease, error and
    /// artifact. Bypasses the lease coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::TaskNotFound`] if no task has this key.
    /// Returns [`CatalogError::Database`] if the update fails.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn reset_task(&self, key: &TaskKey) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE tasks
              SET status = ?,
                  retry_count = 0,
                  lease_started_at = NULL,
                  completed_at = NULL,
                  last_error = NULL,
                  artifact_reference = NULL,
                  updated_at = datetime('now')
              WHERE symbol = ? AND expiration = ? AND target_date = ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(&key.symbol)
        .bind(key.expiration)
        .bind(key.target_date)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::TaskNotFound(key.to_string()));
        }
        info!("task reset to pending by operator");
        Ok(())
    }

    /// Returns every terminally failed task to pending with a fresh retry budget.
    ///
    /// # Returns
    ///
    /// The number of tasks reset.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE tasks
              SET status = ?,
                  retry_count = 0,
                  last_error = NULL,
                  updated_at = datetime('now')
              WHERE status = ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Failed.as_str())
        .execute(self.db.pool())
        .await?;

        let reset = result.rows_affected();
        info!(reset, "failed tasks reset to pending by operator");
        Ok(reset)
    }
}
