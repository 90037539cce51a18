//! Job persistence as seen by the engine.
//!
//! [`JobStore`] mirrors the operations of
//! [`ProvisioningJobRepo`](provisioner_db::repositories::ProvisioningJobRepo).
//! [`PgJobStore`] delegates to it; [`InMemoryJobStore`] reproduces the same
//! conditional-update semantics in process and backs the engine tests.

use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::backoff::BackoffTable;
use provisioner_core::progress::ProgressData;
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::types::{DbId, Timestamp};
use provisioner_db::models::provisioning_job::{
    CreateProvisioningJob, PendingSummary, ProgressUpdate, ProvisioningJob,
};

mod memory;
mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Provisioning job {0} not found")]
    NotFound(DbId),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a pending job.
    async fn create(&self, input: &CreateProvisioningJob) -> Result<ProvisioningJob, StoreError>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<ProvisioningJob>, StoreError>;

    /// Latest job for a tenant code.
    async fn find_by_tenant_code(
        &self,
        tenant_code: &str,
    ) -> Result<Option<ProvisioningJob>, StoreError>;

    /// Atomically take the lock unless a live one exists. `Ok(false)` means
    /// someone else holds it.
    async fn try_acquire_lock(
        &self,
        id: DbId,
        executor_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Clear the lock if `executor_id` still holds it.
    async fn release_lock(&self, id: DbId, executor_id: &str) -> Result<bool, StoreError>;

    async fn mark_running(&self, id: DbId) -> Result<ProvisioningJob, StoreError>;

    /// Shallow-merge `patch` into the progress data; `current_step` never
    /// moves backwards.
    async fn update_progress(
        &self,
        id: DbId,
        patch: &ProgressData,
        update: ProgressUpdate,
    ) -> Result<ProvisioningJob, StoreError>;

    async fn mark_failed(
        &self,
        id: DbId,
        error: &str,
        failed_step: Option<ProvisioningStep>,
        backoff: &BackoffTable,
    ) -> Result<ProvisioningJob, StoreError>;

    async fn mark_succeeded(&self, id: DbId) -> Result<ProvisioningJob, StoreError>;

    /// Jobs eligible to run now, oldest first, never one with a live lock.
    async fn find_due(
        &self,
        limit: i64,
        lock_ttl: Duration,
    ) -> Result<Vec<ProvisioningJob>, StoreError>;

    async fn pending_summary(&self, lock_ttl: Duration) -> Result<PendingSummary, StoreError>;

    /// Current time on the clock used for `next_run_at` and lock expiry.
    async fn current_time(&self) -> Result<Timestamp, StoreError>;

    /// Whether the backing store answers.
    async fn health_check(&self) -> Result<(), StoreError>;
}
