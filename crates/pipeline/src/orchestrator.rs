//! Drives one provisioning job through the pipeline.
//!
//! An execution takes the job lock, resumes at the right step, persists
//! `current_step` before invoking each runner, merges step output into the
//! progress data and finally records success or a scheduled retry. The lock
//! is released exactly once per successful acquisition, whatever happens in
//! between.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use provisioner_core::progress::{self, ProgressData};
use provisioner_core::redact::sanitize_error;
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::types::DbId;
use provisioner_db::models::provisioning_job::{
    CreateProvisioningJob, ProgressUpdate, ProvisioningJob,
};
use provisioner_db::models::status::ProvisioningJobStatus;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::context::StepContext;
use crate::registry::{RegistryError, StepRegistry};
use crate::step::{StepResult, StepRunner};
use crate::store::{JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// How one call to [`Orchestrator::execute`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Another executor holds a live lock; nothing was done.
    NotClaimed,
    /// The job was already succeeded or permanently failed, or its retry
    /// is not due yet.
    Skipped,
    Succeeded,
    Failed {
        /// Step that failed, `None` when the failure happened outside a step.
        step: Option<ProvisioningStep>,
        /// Sanitized error message, as persisted.
        error: String,
        /// Whether another attempt was scheduled.
        retry_scheduled: bool,
    },
}

/// Step at which execution of `job` resumes.
///
/// A failed job resumes at its failed step. Otherwise a job whose
/// `current_step` is a real step (an executor died mid-run) resumes there,
/// and anything else starts from the first step.
pub fn resume_point(job: &ProvisioningJob) -> ProvisioningStep {
    if job.status() == Some(ProvisioningJobStatus::Failed) {
        if let Some(step) = job.failed_step.filter(|s| s.is_executable()) {
            return step;
        }
    }
    if job.current_step.is_executable() {
        return job.current_step;
    }
    ProvisioningStep::PIPELINE[0]
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    registry: StepRegistry,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStore>, registry: StepRegistry, config: PipelineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Enqueue a job for `tenant_id` with the configured attempt limit.
    pub async fn create_job(
        &self,
        tenant_id: DbId,
        tenant_code: &str,
        user_id: Option<DbId>,
        seed_progress: ProgressData,
    ) -> Result<ProvisioningJob, OrchestratorError> {
        let job = self
            .store
            .create(&CreateProvisioningJob {
                tenant_id,
                tenant_code: tenant_code.to_string(),
                user_id,
                max_attempts: self.config.max_attempts,
                seed_progress,
            })
            .await?;
        tracing::info!(job_id = job.id, tenant_code = %job.tenant_code, "Provisioning job created");
        Ok(job)
    }

    /// Run the job as far as it goes in this attempt.
    ///
    /// Returns `Err` only when the store fails in a way that prevents even
    /// recording the failure.
    pub async fn execute(&self, job_id: DbId) -> Result<ExecutionOutcome, OrchestratorError> {
        let executor_id = Uuid::new_v4().to_string();

        let claimed = self
            .store
            .try_acquire_lock(job_id, &executor_id, self.config.lock_ttl)
            .await?;
        if !claimed {
            tracing::debug!(job_id, "Job locked by another executor");
            return Ok(ExecutionOutcome::NotClaimed);
        }

        let outcome = self.execute_locked(job_id, &executor_id).await;

        match self.store.release_lock(job_id, &executor_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    job_id,
                    executor_id = %executor_id,
                    "Lock was taken over before release"
                );
            }
            Err(e) => {
                tracing::error!(
                    job_id,
                    executor_id = %executor_id,
                    error = %e,
                    "Failed to release lock"
                );
            }
        }

        outcome
    }

    /// Run with the lock held, turning unexpected errors into a recorded
    /// failure.
    async fn execute_locked(
        &self,
        job_id: DbId,
        executor_id: &str,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        let mut in_flight = None;
        match self.run_pipeline(job_id, executor_id, &mut in_flight).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let error = sanitize_error(&e.to_string());
                tracing::error!(
                    job_id,
                    executor_id = %executor_id,
                    step = ?in_flight.map(ProvisioningStep::as_str),
                    error = %error,
                    "Unexpected error during provisioning"
                );
                let job = self
                    .store
                    .mark_failed(job_id, &error, in_flight, &self.config.backoff)
                    .await?;
                Ok(ExecutionOutcome::Failed {
                    step: in_flight,
                    error,
                    retry_scheduled: job.next_run_at.is_some(),
                })
            }
        }
    }

    async fn run_pipeline(
        &self,
        job_id: DbId,
        executor_id: &str,
        in_flight: &mut Option<ProvisioningStep>,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        let job = self
            .store
            .find_by_id(job_id)
            .await?
            .ok_or(StoreError::NotFound(job_id))?;

        if job.is_terminal() {
            tracing::info!(job_id, status_id = job.status_id, "Job already finished, skipping");
            return Ok(ExecutionOutcome::Skipped);
        }

        // A stale due-list snapshot can hand over a job that failed moments ago.
        if job.is_backing_off_at(self.store.current_time().await?) {
            tracing::info!(
                job_id,
                next_run_at = ?job.next_run_at,
                "Retry not due yet, skipping"
            );
            return Ok(ExecutionOutcome::Skipped);
        }

        let start = resume_point(&job);
        let job = self.store.mark_running(job_id).await?;
        let mut ctx = StepContext::from_job(&job);

        tracing::info!(
            job_id,
            tenant_code = %ctx.tenant_code,
            executor_id = %executor_id,
            attempt = ctx.attempt,
            resume_at = %start,
            "Starting provisioning"
        );

        for &step in start.remaining() {
            *in_flight = Some(step);
            self.store
                .update_progress(
                    job_id,
                    &ProgressData::new(),
                    ProgressUpdate {
                        status: None,
                        current_step: Some(step),
                    },
                )
                .await?;

            let runner = self.registry.get(step).ok_or(RegistryError::Missing(step))?;
            let result = invoke(runner.as_ref(), &ctx).await;

            if result.success {
                self.record_output(job_id, &mut ctx, result.data).await?;
                tracing::info!(job_id, step = %step, "Step completed");
                continue;
            }

            let error = sanitize_error(
                result
                    .error
                    .as_deref()
                    .unwrap_or("step reported failure without a message"),
            );

            if !step.is_fatal() {
                tracing::warn!(
                    job_id,
                    tenant_code = %ctx.tenant_code,
                    step = %step,
                    error = %error,
                    "Non-fatal step failed, continuing"
                );
                self.record_output(job_id, &mut ctx, result.data).await?;
                continue;
            }

            let failed = self
                .store
                .mark_failed(job_id, &error, Some(step), &self.config.backoff)
                .await?;
            tracing::error!(
                job_id,
                tenant_code = %ctx.tenant_code,
                step = %step,
                attempts = failed.attempts,
                max_attempts = failed.max_attempts,
                next_run_at = ?failed.next_run_at,
                error = %error,
                "Provisioning step failed"
            );
            return Ok(ExecutionOutcome::Failed {
                step: Some(step),
                error,
                retry_scheduled: failed.next_run_at.is_some(),
            });
        }

        *in_flight = None;
        self.store.mark_succeeded(job_id).await?;
        tracing::info!(job_id, tenant_code = %ctx.tenant_code, "Provisioning completed");
        Ok(ExecutionOutcome::Succeeded)
    }

    /// Persist a step's output and fold it into the context.
    async fn record_output(
        &self,
        job_id: DbId,
        ctx: &mut StepContext,
        data: Option<ProgressData>,
    ) -> Result<(), OrchestratorError> {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return Ok(());
        };
        self.store
            .update_progress(job_id, &data, ProgressUpdate::default())
            .await?;
        progress::merge(&mut ctx.progress_data, data);
        Ok(())
    }
}

/// Run a step, converting a panic into a failed result.
async fn invoke(runner: &dyn StepRunner, ctx: &StepContext) -> StepResult {
    match AssertUnwindSafe(runner.run(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => StepResult::failed(format!("step panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn job(status: ProvisioningJobStatus, current: ProvisioningStep) -> ProvisioningJob {
        let now = Utc::now();
        ProvisioningJob {
            id: 1,
            tenant_id: 1,
            tenant_code: "acme".into(),
            user_id: None,
            status_id: status.id(),
            current_step: current,
            attempts: 0,
            max_attempts: 5,
            next_run_at: None,
            last_error: None,
            failed_step: None,
            progress_data: ProgressData::new(),
            locked_at: None,
            locked_by: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn new_job_starts_at_the_first_step() {
        let j = job(ProvisioningJobStatus::Pending, ProvisioningStep::Queued);
        assert_eq!(resume_point(&j), ProvisioningStep::Init);
    }

    #[test]
    fn failed_job_resumes_at_failed_step() {
        let mut j = job(ProvisioningJobStatus::Failed, ProvisioningStep::UpsertTenant);
        j.failed_step = Some(ProvisioningStep::Authenticate);
        assert_eq!(resume_point(&j), ProvisioningStep::Authenticate);
    }

    #[test]
    fn abandoned_running_job_resumes_at_current_step() {
        let j = job(ProvisioningJobStatus::Running, ProvisioningStep::UpsertUser);
        assert_eq!(resume_point(&j), ProvisioningStep::UpsertUser);
    }

    #[test]
    fn failed_job_without_step_falls_back_to_current_step() {
        let j = job(ProvisioningJobStatus::Failed, ProvisioningStep::Finalize);
        assert_eq!(resume_point(&j), ProvisioningStep::Finalize);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*owned), "owned");
        assert_eq!(panic_message(&*borrowed), "borrowed");
        assert_eq!(panic_message(&*other), "unknown panic payload");
    }
}
