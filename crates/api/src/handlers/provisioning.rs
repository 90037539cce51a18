//! Handlers for the `/provisioning` resource.
//!
//! Job creation enqueues a job and, unless disabled, kicks off its first
//! attempt in the background. The worker endpoints expose the batch contract
//! to schedulers that cannot run the worker binary themselves.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use provisioner_core::error::CoreError;
use provisioner_core::progress::{self, ProgressData};
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::tenant::validate_tenant_code;
use provisioner_core::types::{DbId, Timestamp};
use provisioner_db::models::provisioning_job::ProvisioningJob;
use provisioner_pipeline::orchestrator::ExecutionOutcome;
use provisioner_worker::RunOptions;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Body of `POST /provisioning/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[validate(range(min = 1))]
    pub tenant_id: DbId,
    #[validate(length(min = 2, max = 32))]
    pub tenant_code: String,
    #[validate(range(min = 1))]
    pub user_id: Option<DbId>,
    /// Initial progress data; merged under whatever the steps write. Keys
    /// owned by a step are rejected, since they would read as completion
    /// markers.
    #[serde(default)]
    pub seed_progress: Option<ProgressData>,
}

/// Body of `POST /provisioning/worker/run`. Absent fields fall back to the
/// server defaults.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RunWorkerRequest {
    #[validate(range(min = 1, max = 100))]
    pub batch_size: Option<i64>,
    #[validate(range(min = 1))]
    pub max_duration_ms: Option<u64>,
    pub stop_on_error: Option<bool>,
}

impl RunWorkerRequest {
    fn apply(&self, defaults: &RunOptions) -> RunOptions {
        RunOptions {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            max_duration: self
                .max_duration_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_duration),
            stop_on_error: self.stop_on_error.unwrap_or(defaults.stop_on_error),
        }
    }
}

/// A provisioning job as returned to API callers.
///
/// Credential values in the progress data are redacted.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: DbId,
    pub tenant_id: DbId,
    pub tenant_code: String,
    pub user_id: Option<DbId>,
    pub status: String,
    pub current_step: ProvisioningStep,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_run_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub failed_step: Option<ProvisioningStep>,
    pub progress_data: ProgressData,
    pub locked_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<ProvisioningJob> for JobView {
    fn from(job: ProvisioningJob) -> Self {
        let status = job
            .status()
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| format!("unknown({})", job.status_id));
        Self {
            id: job.id,
            tenant_id: job.tenant_id,
            tenant_code: job.tenant_code,
            user_id: job.user_id,
            status,
            current_step: job.current_step,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            next_run_at: job.next_run_at,
            last_error: job.last_error,
            failed_step: job.failed_step,
            progress_data: progress::redacted(&job.progress_data),
            locked_at: job.locked_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// POST /api/v1/provisioning/jobs
///
/// Enqueue a job for a tenant. Returns 201 with the pending job; the first
/// attempt runs in the background when `execute_on_create` is set.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    validate_tenant_code(&input.tenant_code)?;
    let seed = input.seed_progress.unwrap_or_default();
    let reserved = progress::step_owned_keys(&seed);
    if !reserved.is_empty() {
        return Err(AppError::Core(CoreError::Validation(format!(
            "seed_progress may not set step-owned keys: {}",
            reserved.join(", ")
        ))));
    }

    let job = state
        .orchestrator
        .create_job(
            input.tenant_id,
            &input.tenant_code,
            input.user_id,
            seed,
        )
        .await?;

    if state.config.execute_on_create {
        let orchestrator = state.orchestrator.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            match orchestrator.execute(job_id).await {
                Ok(ExecutionOutcome::Failed { error, .. }) => {
                    tracing::warn!(job_id, error = %error, "Immediate provisioning attempt failed");
                }
                Ok(outcome) => {
                    tracing::debug!(job_id, ?outcome, "Immediate provisioning attempt finished");
                }
                Err(e) => {
                    tracing::error!(job_id, error = %e, "Immediate provisioning attempt aborted");
                }
            }
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: JobView::from(job),
        }),
    ))
}

/// GET /api/v1/provisioning/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .orchestrator
        .store()
        .find_by_id(id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "ProvisioningJob",
            id,
        }))?;

    Ok(Json(DataResponse {
        data: JobView::from(job),
    }))
}

/// GET /api/v1/provisioning/tenants/{code}/job
///
/// Latest job for the tenant code.
pub async fn get_tenant_job(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .orchestrator
        .store()
        .find_by_tenant_code(&code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No provisioning job for tenant '{code}'")))?;

    Ok(Json(DataResponse {
        data: JobView::from(job),
    }))
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// POST /api/v1/provisioning/worker/run
///
/// Run one batch synchronously and return its summary. Send `{}` for the
/// server defaults.
pub async fn run_worker(
    State(state): State<AppState>,
    Json(input): Json<RunWorkerRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let options = input.apply(&state.run_defaults);

    let summary = state.worker.run(options).await?;
    Ok(Json(DataResponse { data: summary }))
}

/// GET /api/v1/provisioning/worker/status
pub async fn worker_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(DataResponse {
        data: state.worker.status().await,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_overlays_defaults() {
        let defaults = RunOptions::default();
        let request = RunWorkerRequest {
            batch_size: Some(3),
            ..RunWorkerRequest::default()
        };

        let options = request.apply(&defaults);
        assert_eq!(options.batch_size, 3);
        assert_eq!(options.max_duration, defaults.max_duration);
        assert_eq!(options.stop_on_error, defaults.stop_on_error);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let request = RunWorkerRequest {
            batch_size: Some(500),
            ..RunWorkerRequest::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn short_tenant_code_is_rejected() {
        let request = CreateJobRequest {
            tenant_id: 1,
            tenant_code: "a".into(),
            user_id: None,
            seed_progress: None,
        };
        assert!(request.validate().is_err());
    }
}
