//! Repository seam for lease operations.
//!
//! The worker loop depends on this trait rather than on
//! [`LeaseCoordinator`] directly, so tests can wrap the real coordinator
//! and inject store failures at any step.

use async_trait::async_trait;

use super::LeaseCoordinator;
use crate::catalog::{Result, Task, TaskStatus};

/// Lease operations a worker needs.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Claims the next eligible task.
    async fn claim_next(&self, max_retries: u32) -> Result<Option<Task>>;

    /// Completes a task leased under `lease_token` with its artifact locator.
    async fn mark_completed(
        &self,
        id: i64,
        lease_token: i64,
        artifact_reference: &str,
    ) -> Result<()>;

    /// Records a failed attempt under `lease_token`; returns the resulting status.
    async fn mark_failed(
        &self,
        id: i64,
        lease_token: i64,
        error: &str,
        max_retries: u32,
    ) -> Result<TaskStatus>;
}

#[async_trait]
impl LeaseRepository for LeaseCoordinator {
    async fn claim_next(&self, max_retries: u32) -> Result<Option<Task>> {
        LeaseCoordinator::claim_next(self, max_retries).await
    }

    async fn mark_completed(
        &self,
        id: i64,
        lease_token: i64,
        artifact_reference: &str,
    ) -> Result<()> {
        LeaseCoordinator::mark_completed(self, id, lease_token, artifact_reference).await
    }

    async fn mark_failed(
        &self,
        id: i64,
        lease_token: i64,
        error: &str,
        max_retries: u32,
    ) -> Result<TaskStatus> {
        LeaseCoordinator::mark_failed(self, id, lease_token, error, max_retries).await
    }
}
