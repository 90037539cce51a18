use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::backoff::BackoffTable;
use provisioner_core::progress::ProgressData;
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::types::{DbId, Timestamp};
use provisioner_db::models::provisioning_job::{
    CreateProvisioningJob, PendingSummary, ProgressUpdate, ProvisioningJob,
};
use provisioner_db::repositories::ProvisioningJobRepo;
use provisioner_db::DbPool;

use super::{JobStore, StoreError};

/// [`JobStore`] backed by Postgres.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: &CreateProvisioningJob) -> Result<ProvisioningJob, StoreError> {
        Ok(ProvisioningJobRepo::create(&self.pool, input).await?)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<ProvisioningJob>, StoreError> {
        Ok(ProvisioningJobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_tenant_code(
        &self,
        tenant_code: &str,
    ) -> Result<Option<ProvisioningJob>, StoreError> {
        Ok(ProvisioningJobRepo::find_by_tenant_code(&self.pool, tenant_code).await?)
    }

    async fn try_acquire_lock(
        &self,
        id: DbId,
        executor_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(ProvisioningJobRepo::try_acquire_lock(&self.pool, id, executor_id, ttl).await?)
    }

    async fn release_lock(&self, id: DbId, executor_id: &str) -> Result<bool, StoreError> {
        Ok(ProvisioningJobRepo::release_lock(&self.pool, id, executor_id).await?)
    }

    async fn mark_running(&self, id: DbId) -> Result<ProvisioningJob, StoreError> {
        ProvisioningJobRepo::mark_running(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_progress(
        &self,
        id: DbId,
        patch: &ProgressData,
        update: ProgressUpdate,
    ) -> Result<ProvisioningJob, StoreError> {
        ProvisioningJobRepo::update_progress(&self.pool, id, patch, update)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn mark_failed(
        &self,
        id: DbId,
        error: &str,
        failed_step: Option<ProvisioningStep>,
        backoff: &BackoffTable,
    ) -> Result<ProvisioningJob, StoreError> {
        ProvisioningJobRepo::mark_failed(&self.pool, id, error, failed_step, backoff)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn mark_succeeded(&self, id: DbId) -> Result<ProvisioningJob, StoreError> {
        ProvisioningJobRepo::mark_succeeded(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_due(
        &self,
        limit: i64,
        lock_ttl: Duration,
    ) -> Result<Vec<ProvisioningJob>, StoreError> {
        Ok(ProvisioningJobRepo::find_due(&self.pool, limit, lock_ttl).await?)
    }

    async fn pending_summary(&self, lock_ttl: Duration) -> Result<PendingSummary, StoreError> {
        Ok(ProvisioningJobRepo::pending_summary(&self.pool, lock_ttl).await?)
    }

    async fn current_time(&self) -> Result<Timestamp, StoreError> {
        Ok(ProvisioningJobRepo::current_time(&self.pool).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(provisioner_db::health_check(&self.pool).await?)
    }
}
