//! Lease coordinator: the atomic task transitions shared by all workers.
//!
//! Workers in different processes share nothing but the SQLite file. Every
//! operation here runs inside one `BEGIN IMMEDIATE` transaction, so the write
//! lock is held from the first read to the commit. That is what makes
//! [`LeaseCoordinator::claim_next`] safe when many workers race for the same
//! candidate: the second claimant waits on the lock and then sees the row
//! already `in_progress`.
//!
//! Every claim also bumps the row's `lease_token`. Completion and failure
//! reports must carry the token their claim returned, so a worker whose lease
//! was reclaimed and handed to someone else cannot touch the new holder's
//! lease, whatever order the two report in.
//!
//! Lifecycle enforced here:
//!
//! ```text
//! pending ──claim──▶ in_progress ──complete──▶ completed
//!    ▲                   │  │
//!    └──fail (retries)───┘  └──fail (exhausted)──▶ failed
//!    ▲                   │
//!    └──reclaim (stale)──┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::{Database, LeaseCoordinator};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("tasks.db")).await?;
//! let coordinator = LeaseCoordinator::new(db);
//!
//! if let Some(task) = coordinator.claim_next(3).await? {
//!     // ... fetch and store ...
//!     coordinator
//!         .mark_completed(task.id, task.lease_token, "/data/SPX/2024/06/file.csv")
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod reclaimer;
mod repository;

pub use reclaimer::Reclaimer;
pub use repository::LeaseRepository;

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::catalog::{CLAIM_ORDER, CatalogError, Result, Task, TaskStatus};
use crate::db::{Database, WriteTransaction};

/// Performs the lease transitions over the task catalog.
#[derive(Debug, Clone)]
pub struct LeaseCoordinator {
    db: Database,
}

impl LeaseCoordinator {
    /// Creates a coordinator over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Claims the eligible task with the newest `(expiration, target_date)`.
    ///
    /// Eligible tasks are `pending`, or `failed` with `retry_count < max_retries`.
    /// The chosen task moves to `in_progress` with `lease_started_at = now`
    /// and a fresh `lease_token`.
    ///
    /// Returns `None` when nothing is eligible.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the transaction fails; no lease
    /// is taken in that case.
    #[instrument(skip(self))]
    pub async fn claim_next(&self, max_retries: u32) -> Result<Option<Task>> {
        let mut tx = self.db.begin_immediate().await?;

        let sql = format!(
            r"UPDATE tasks
              SET status = ?,
                  lease_started_at = datetime('now'),
                  lease_token = lease_token + 1,
                  updated_at = datetime('now')
              WHERE id = (
                  SELECT id FROM tasks
                  WHERE status = ?
                     OR (status = ? AND retry_count < ?)
                  ORDER BY {CLAIM_ORDER}
                  LIMIT 1
              )
              RETURNING *"
        );
        let claimed = sqlx::query_as::<_, Task>(&sql)
            .bind(TaskStatus::InProgress.as_str())
            .bind(TaskStatus::Pending.as_str())
            .bind(TaskStatus::Failed.as_str())
            .bind(i64::from(max_retries))
            .fetch_optional(tx.conn())
            .await
            .map_err(CatalogError::from);

        let claimed = finish(tx, claimed).await?;
        match &claimed {
            Some(task) => debug!(
                task_id = task.id,
                key = %task.key,
                retry_count = task.retry_count,
                lease_token = task.lease_token,
                "lease acquired"
            ),
            None => debug!("no eligible task"),
        }
        Ok(claimed)
    }

    /// Records a successful task: stores the artifact locator and completes it.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EmptyArtifact`] for a blank locator (nothing is
    /// written), [`CatalogError::InvalidTransition`] if the task is not
    /// `in_progress` under `lease_token`, [`CatalogError::TaskNotFound`] for
    /// an unknown id, or
    /// [`CatalogError::Database`] if the transaction fails. The row is
    /// unchanged in every error case.
    #[instrument(skip(self, artifact_reference))]
    pub async fn mark_completed(
        &self,
        id: i64,
        lease_token: i64,
        artifact_reference: &str,
    ) -> Result<()> {
        if artifact_reference.trim().is_empty() {
            return Err(CatalogError::EmptyArtifact(id));
        }

        let mut tx = self.db.begin_immediate().await?;
        let updated = sqlx::query(
            r"UPDATE tasks
              SET status = ?,
                  artifact_reference = ?,
                  completed_at = datetime('now'),
                  lease_started_at = NULL,
                  last_error = NULL,
                  updated_at = datetime('now')
              WHERE id = ? AND status = ? AND lease_token = ?",
        )
        .bind(TaskStatus::Completed.as_str())
        .bind(artifact_reference)
        .bind(id)
        .bind(TaskStatus::InProgress.as_str())
        .bind(lease_token)
        .execute(tx.conn())
        .await
        .map(|result| result.rows_affected());

        let outcome = match updated {
            Ok(0) => Err(transition_error(&mut tx, id, "complete").await),
            Ok(_) => Ok(()),
            Err(err) => Err(err.into()),
        };
        finish(tx, outcome).await?;

        debug!(task_id = id, "completion recorded");
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// Increments `retry_count` and stores `error`. The task goes back to
    /// `pending` while the new count is below `max_retries`, otherwise it
    /// becomes terminally `failed`.
    ///
    /// Returns the status the task ended in.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidTransition`] if the task is not
    /// `in_progress` under `lease_token`, [`CatalogError::TaskNotFound`] for an
    /// unknown id, or [`CatalogError::Database`] if the transaction fails.
    #[instrument(skip(self, error))]
    pub async fn mark_failed(
        &self,
        id: i64,
        lease_token: i64,
        error: &str,
        max_retries: u32,
    ) -> Result<TaskStatus> {
        let mut tx = self.db.begin_immediate().await?;
        let updated = sqlx::query_as::<_, (String, i64)>(
            r"UPDATE tasks
              SET retry_count = retry_count + 1,
                  status = CASE WHEN retry_count + 1 < ? THEN ? ELSE ? END,
                  last_error = ?,
                  lease_started_at = NULL,
                  updated_at = datetime('now')
              WHERE id = ? AND status = ? AND lease_token = ?
              RETURNING status, retry_count",
        )
        .bind(i64::from(max_retries))
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Failed.as_str())
        .bind(error)
        .bind(id)
        .bind(TaskStatus::InProgress.as_str())
        .bind(lease_token)
        .fetch_optional(tx.conn())
        .await;

        let outcome = match updated {
            Ok(Some((raw, retry_count))) => raw
                .parse::<TaskStatus>()
                .map(|status| (status, retry_count))
                .map_err(|_| CatalogError::invalid_status(&raw)),
            Ok(None) => Err(transition_error(&mut tx, id, "fail").await),
            Err(err) => Err(err.into()),
        };
        let (status, retry_count) = finish(tx, outcome).await?;

        debug!(task_id = id, %status, retry_count, max_retries, "failure recorded");
        Ok(status)
    }

    /// Returns stale leases to `pending`.
    ///
    /// A lease is stale when `lease_started_at` is older than `lease_timeout`.
    /// The retry budget is not charged; `last_error` records the reclaim.
    ///
    /// Returns the number of tasks reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the transaction fails; nothing is
    /// reclaimed in that case.
    #[instrument(skip(self), fields(lease_timeout_secs = lease_timeout.as_secs()))]
    pub async fn reclaim_stuck(&self, lease_timeout: Duration) -> Result<u64> {
        let secs = lease_timeout.as_secs();
        let note = format!("lease reclaimed: in progress longer than {secs}s");

        let mut tx = self.db.begin_immediate().await?;
        let reclaimed = sqlx::query(
            r"UPDATE tasks
              SET status = ?,
                  lease_started_at = NULL,
                  last_error = ?,
                  updated_at = datetime('now')
              WHERE status = ?
                AND lease_started_at < datetime('now', ?)",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(&note)
        .bind(TaskStatus::InProgress.as_str())
        .bind(format!("-{secs} seconds"))
        .execute(tx.conn())
        .await
        .map(|result| result.rows_affected())
        .map_err(CatalogError::from);

        let reclaimed = finish(tx, reclaimed).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed stale leases");
        }
        Ok(reclaimed)
    }
}

/// Works out why a guarded update matched no row, under the same lock.
///
/// A row that is `in_progress` here is held under a newer token: the caller's
/// lease was reclaimed and claimed again.
async fn transition_error(
    tx: &mut WriteTransaction,
    id: i64,
    operation: &'static str,
) -> CatalogError {
    let current = sqlx::query_as::<_, (String,)>("SELECT status FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.conn())
        .await;

    match current {
        Ok(Some((raw,))) => match raw.parse::<TaskStatus>() {
            Ok(status) => CatalogError::InvalidTransition {
                id,
                status,
                operation,
            },
            Err(_) => CatalogError::invalid_status(&raw),
        },
        Ok(None) => CatalogError::TaskNotFound(format!("id {id}")),
        Err(err) => err.into(),
    }
}

/// Commits on success, rolls back on failure.
async fn finish<T>(tx: WriteTransaction, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tx.rollback().await;
            Err(err)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, TaskKey};

    async fn setup() -> (Catalog, LeaseCoordinator) {
        let db = Database::new_in_memory().await.unwrap();
        (Catalog::new(db.clone()), LeaseCoordinator::new(db))
    }

    fn key(raw: &str) -> TaskKey {
        raw.parse().unwrap()
    }

    #[tokio::test]
    async fn test_claim_next_on_empty_catalog_returns_none() {
        let (_catalog, coordinator) = setup().await;
        assert!(coordinator.claim_next(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_next_sets_lease() {
        let (catalog, coordinator) = setup().await;
        catalog
            .create(&key("SPX,2024-06-21,2024-06-20"))
            .await
            .unwrap();

        let task = coordinator.claim_next(3).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.lease_started_at.is_some());
        assert!(coordinator.claim_next(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_completed_rejects_blank_artifact_without_writing() {
        let (catalog, coordinator) = setup().await;
        catalog
            .create(&key("SPX,2024-06-21,2024-06-20"))
            .await
            .unwrap();
        let task = coordinator.claim_next(3).await.unwrap().unwrap();

        let err = coordinator
            .mark_completed(task.id, task.lease_token, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::EmptyArtifact(id) if id == task.id));

        let after = catalog.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_mark_completed_unknown_id_returns_not_found() {
        let (_catalog, coordinator) = setup().await;
        let err = coordinator
            .mark_completed(999, 1, "/tmp/a.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_failed_on_pending_task_is_invalid_transition() {
        let (catalog, coordinator) = setup().await;
        let id = catalog
            .create(&key("SPX,2024-06-21,2024-06-20"))
            .await
            .unwrap()
            .unwrap();

        let err = coordinator.mark_failed(id, 0, "boom", 3).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InvalidTransition {
                status: TaskStatus::Pending,
                operation: "fail",
                ..
            }
        ));

        let after = catalog.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(after.retry_count, 0);
        assert!(after.last_error.is_none());
    }

    #[tokio::test]
    async fn test_claim_bumps_lease_token_and_old_token_is_rejected() {
        let (catalog, coordinator) = setup().await;
        catalog
            .create(&key("SPX,2024-06-21,2024-06-20"))
            .await
            .unwrap();

        let first = coordinator.claim_next(3).await.unwrap().unwrap();
        assert_eq!(first.lease_token, 1);
        coordinator
            .mark_failed(first.id, first.lease_token, "flaky", 3)
            .await
            .unwrap();

        let second = coordinator.claim_next(3).await.unwrap().unwrap();
        assert_eq!(second.lease_token, 2);

        let err = coordinator
            .mark_completed(first.id, first.lease_token, "/tmp/a.csv")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InvalidTransition {
                status: TaskStatus::InProgress,
                operation: "complete",
                ..
            }
        ));

        coordinator
            .mark_completed(second.id, second.lease_token, "/tmp/b.csv")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reclaim_stuck_ignores_fresh_leases() {
        let (catalog, coordinator) = setup().await;
        catalog
            .create(&key("SPX,2024-06-21,2024-06-20"))
            .await
            .unwrap();
        coordinator.claim_next(3).await.unwrap().unwrap();

        let reclaimed = coordinator
            .reclaim_stuck(Duration::from_secs(1800))
            .await
            .unwrap();
        assert_eq!(reclaimed, 0);
    }
}
