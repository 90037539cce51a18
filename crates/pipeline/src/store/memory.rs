use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use provisioner_core::backoff::{self, BackoffTable};
use provisioner_core::progress::{self, ProgressData};
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::tenant::provisioning_status;
use provisioner_core::types::{DbId, Timestamp};
use provisioner_db::models::provisioning_job::{
    CreateProvisioningJob, PendingSummary, ProgressUpdate, ProvisioningJob,
};
use provisioner_db::models::status::ProvisioningJobStatus;

use super::{JobStore, StoreError};

/// In-process [`JobStore`].
///
/// Every operation runs under one mutex, which gives it the same atomicity
/// as the single-statement updates of the Postgres repository. The clock can
/// be moved forward with [`InMemoryJobStore::advance`] to exercise lock
/// expiry and retry scheduling.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

struct State {
    jobs: BTreeMap<DbId, ProvisioningJob>,
    next_id: DbId,
    clock_offset: chrono::Duration,
    tenant_status: HashMap<DbId, (String, Option<String>)>,
    failing_progress_writes: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            jobs: BTreeMap::new(),
            next_id: 0,
            clock_offset: chrono::Duration::zero(),
            tenant_status: HashMap::new(),
            failing_progress_writes: 0,
        }
    }
}

impl State {
    fn now(&self) -> Timestamp {
        Utc::now() + self.clock_offset
    }

    fn job_mut(&mut self, id: DbId) -> Result<&mut ProvisioningJob, StoreError> {
        self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))
    }

    fn is_due(&self, job: &ProvisioningJob, now: Timestamp, ttl: chrono::Duration) -> bool {
        let eligible = match job.status() {
            Some(ProvisioningJobStatus::Pending) | Some(ProvisioningJobStatus::Running) => true,
            Some(ProvisioningJobStatus::Failed) => job.next_run_at.is_some(),
            _ => false,
        };
        eligible
            && job.next_run_at.map_or(true, |at| at <= now)
            && !job.is_locked_at(now, ttl)
    }

    fn due(&self, lock_ttl: Duration) -> Vec<ProvisioningJob> {
        let now = self.now();
        let ttl = chrono_ttl(lock_ttl);
        let mut due: Vec<_> = self
            .jobs
            .values()
            .filter(|job| self.is_due(job, now, ttl))
            .cloned()
            .collect();
        due.sort_by_key(|job| (job.created_at, job.id));
        due
    }

    fn mirror(&mut self, tenant_id: DbId, status: &str, error: Option<&str>) {
        self.tenant_status
            .insert(tenant_id, (status.to_string(), error.map(str::to_string)));
    }
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

/// Stand-in for a dropped connection, used by failure injection.
fn injected_failure() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current time as seen by the store.
    pub fn now(&self) -> Timestamp {
        self.lock().now()
    }

    /// Move the store clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        self.lock().clock_offset += by;
    }

    /// Make the next `count` progress writes fail with a database error.
    pub fn fail_progress_writes(&self, count: usize) {
        self.lock().failing_progress_writes = count;
    }

    /// Snapshot of a job.
    pub fn get(&self, id: DbId) -> Option<ProvisioningJob> {
        self.lock().jobs.get(&id).cloned()
    }

    /// Mirrored tenant `(provisioning_status, provisioning_error)`.
    pub fn tenant_status(&self, tenant_id: DbId) -> Option<(String, Option<String>)> {
        self.lock().tenant_status.get(&tenant_id).cloned()
    }

    /// Overwrite a job's lock columns.
    pub fn set_lock(&self, id: DbId, locked_at: Option<Timestamp>, locked_by: Option<&str>) {
        if let Some(job) = self.lock().jobs.get_mut(&id) {
            job.locked_at = locked_at;
            job.locked_by = locked_by.map(str::to_string);
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, input: &CreateProvisioningJob) -> Result<ProvisioningJob, StoreError> {
        let mut state = self.lock();
        let now = state.now();
        state.next_id += 1;
        let job = ProvisioningJob {
            id: state.next_id,
            tenant_id: input.tenant_id,
            tenant_code: input.tenant_code.clone(),
            user_id: input.user_id,
            status_id: ProvisioningJobStatus::Pending.id(),
            current_step: ProvisioningStep::INITIAL,
            attempts: 0,
            max_attempts: input.max_attempts,
            next_run_at: Some(now),
            last_error: None,
            failed_step: None,
            progress_data: input.seed_progress.clone(),
            locked_at: None,
            locked_by: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        state.mirror(job.tenant_id, provisioning_status::PENDING, None);
        Ok(job)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<ProvisioningJob>, StoreError> {
        Ok(self.get(id))
    }

    async fn find_by_tenant_code(
        &self,
        tenant_code: &str,
    ) -> Result<Option<ProvisioningJob>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|job| job.tenant_code == tenant_code)
            .max_by_key(|job| (job.created_at, job.id))
            .cloned())
    }

    async fn try_acquire_lock(
        &self,
        id: DbId,
        executor_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let now = state.now();
        let job = state.job_mut(id)?;
        if job.is_locked_at(now, chrono_ttl(ttl)) {
            return Ok(false);
        }
        job.locked_at = Some(now);
        job.locked_by = Some(executor_id.to_string());
        job.updated_at = now;
        Ok(true)
    }

    async fn release_lock(&self, id: DbId, executor_id: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let job = state.job_mut(id)?;
        if job.locked_by.as_deref() != Some(executor_id) {
            return Ok(false);
        }
        job.locked_at = None;
        job.locked_by = None;
        Ok(true)
    }

    async fn mark_running(&self, id: DbId) -> Result<ProvisioningJob, StoreError> {
        let mut state = self.lock();
        let now = state.now();
        let job = state.job_mut(id)?;
        job.status_id = ProvisioningJobStatus::Running.id();
        job.started_at.get_or_insert(now);
        job.updated_at = now;
        let job = job.clone();
        state.mirror(job.tenant_id, provisioning_status::PROVISIONING, None);
        Ok(job)
    }

    async fn update_progress(
        &self,
        id: DbId,
        patch: &ProgressData,
        update: ProgressUpdate,
    ) -> Result<ProvisioningJob, StoreError> {
        let mut state = self.lock();
        if state.failing_progress_writes > 0 {
            state.failing_progress_writes -= 1;
            return Err(injected_failure());
        }
        let now = state.now();
        let job = state.job_mut(id)?;
        progress::merge(&mut job.progress_data, patch.clone());
        if let Some(status) = update.status {
            job.status_id = status.id();
        }
        if let Some(step) = update.current_step {
            if step >= job.current_step {
                job.current_step = step;
            }
        }
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn mark_failed(
        &self,
        id: DbId,
        error: &str,
        failed_step: Option<ProvisioningStep>,
        backoff: &BackoffTable,
    ) -> Result<ProvisioningJob, StoreError> {
        let mut state = self.lock();
        let now = state.now();
        let job = state.job_mut(id)?;
        job.next_run_at = backoff::next_run_at(backoff, job.attempts + 1, job.max_attempts, now);
        job.attempts = (job.attempts + 1).min(job.max_attempts);
        job.status_id = ProvisioningJobStatus::Failed.id();
        job.last_error = Some(error.to_string());
        if failed_step.is_some() {
            job.failed_step = failed_step;
        }
        job.updated_at = now;
        let job = job.clone();
        state.mirror(job.tenant_id, provisioning_status::FAILED, Some(error));
        Ok(job)
    }

    async fn mark_succeeded(&self, id: DbId) -> Result<ProvisioningJob, StoreError> {
        let mut state = self.lock();
        let now = state.now();
        let job = state.job_mut(id)?;
        job.status_id = ProvisioningJobStatus::Succeeded.id();
        job.current_step = ProvisioningStep::FINAL;
        job.completed_at = Some(now);
        job.next_run_at = None;
        job.failed_step = None;
        job.last_error = None;
        job.locked_at = None;
        job.locked_by = None;
        job.updated_at = now;
        let job = job.clone();
        state.mirror(job.tenant_id, provisioning_status::READY, None);
        Ok(job)
    }

    async fn find_due(
        &self,
        limit: i64,
        lock_ttl: Duration,
    ) -> Result<Vec<ProvisioningJob>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self.lock().due(lock_ttl).into_iter().take(limit).collect())
    }

    async fn pending_summary(&self, lock_ttl: Duration) -> Result<PendingSummary, StoreError> {
        let due = self.lock().due(lock_ttl);
        Ok(PendingSummary {
            due_count: due.len() as i64,
            oldest: due.into_iter().next(),
        })
    }

    async fn current_time(&self) -> Result<Timestamp, StoreError> {
        Ok(self.now())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use provisioner_core::progress::keys;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn input(code: &str, max_attempts: i32) -> CreateProvisioningJob {
        CreateProvisioningJob {
            tenant_id: 1,
            tenant_code: code.to_string(),
            user_id: None,
            max_attempts,
            seed_progress: ProgressData::new(),
        }
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_expiry() {
        let store = InMemoryJobStore::new();
        let job = store.create(&input("acme", 5)).await.unwrap();

        assert!(store.try_acquire_lock(job.id, "a", TTL).await.unwrap());
        assert!(!store.try_acquire_lock(job.id, "b", TTL).await.unwrap());

        store.advance(chrono::Duration::seconds(61));
        assert!(store.try_acquire_lock(job.id, "b", TTL).await.unwrap());

        assert!(!store.release_lock(job.id, "a").await.unwrap());
        assert!(store.release_lock(job.id, "b").await.unwrap());
    }

    #[tokio::test]
    async fn current_step_never_moves_backwards() {
        let store = InMemoryJobStore::new();
        let job = store.create(&input("acme", 5)).await.unwrap();

        let forward = ProgressUpdate {
            status: None,
            current_step: Some(ProvisioningStep::UpsertTenant),
        };
        store
            .update_progress(job.id, &ProgressData::new(), forward)
            .await
            .unwrap();

        let backward = ProgressUpdate {
            status: None,
            current_step: Some(ProvisioningStep::Init),
        };
        let job = store
            .update_progress(
                job.id,
                &progress::patch([(keys::DATABASE_NAME, "tenant_acme")]),
                backward,
            )
            .await
            .unwrap();

        assert_eq!(job.current_step, ProvisioningStep::UpsertTenant);
        assert_eq!(job.progress_data[keys::DATABASE_NAME], "tenant_acme");
    }

    #[tokio::test]
    async fn failures_back_off_then_exhaust() {
        let store = InMemoryJobStore::new();
        let job = store.create(&input("acme", 2)).await.unwrap();
        let table = BackoffTable::parse_secs("30").unwrap();

        let failed = store
            .mark_failed(job.id, "boom", Some(ProvisioningStep::CopyDatabase), &table)
            .await
            .unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(
            failed.next_run_at,
            Some(failed.updated_at + chrono::Duration::seconds(30))
        );
        assert!(store.find_due(10, TTL).await.unwrap().is_empty());

        store.advance(chrono::Duration::seconds(31));
        assert_eq!(store.find_due(10, TTL).await.unwrap().len(), 1);

        let exhausted = store.mark_failed(job.id, "boom", None, &table).await.unwrap();
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(exhausted.next_run_at, None);
        assert_eq!(exhausted.failed_step, Some(ProvisioningStep::CopyDatabase));
        assert!(store.find_due(10, TTL).await.unwrap().is_empty());
        assert_eq!(
            store.tenant_status(1),
            Some(("failed".to_string(), Some("boom".to_string())))
        );
    }

    #[tokio::test]
    async fn find_due_is_oldest_first_and_bounded() {
        let store = InMemoryJobStore::new();
        let first = store.create(&input("alpha", 5)).await.unwrap();
        store.advance(chrono::Duration::seconds(1));
        let second = store.create(&input("beta", 5)).await.unwrap();
        store.advance(chrono::Duration::seconds(1));
        store.create(&input("gamma", 5)).await.unwrap();

        let due = store.find_due(2, TTL).await.unwrap();
        let ids: Vec<_> = due.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        let summary = store.pending_summary(TTL).await.unwrap();
        assert_eq!(summary.due_count, 3);
        assert_eq!(summary.oldest.map(|j| j.id), Some(first.id));
    }
}
