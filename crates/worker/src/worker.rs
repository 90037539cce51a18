use std::sync::Arc;
use std::time::{Duration, Instant};

use provisioner_core::redact::sanitize_error;
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::types::{DbId, Timestamp};
use provisioner_db::models::provisioning_job::ProvisioningJob;
use provisioner_pipeline::orchestrator::{ExecutionOutcome, Orchestrator};
use provisioner_pipeline::store::StoreError;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_DURATION_MS};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to fetch due jobs: {0}")]
    Fetch(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Invocation contract
// ---------------------------------------------------------------------------

/// Limits for one batch.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch_size: i64,
    /// Checked before each job; a job already running is never interrupted.
    pub max_duration: Duration,
    /// Stop the batch after the first failed job.
    pub stop_on_error: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_duration: Duration::from_millis(DEFAULT_MAX_DURATION_MS),
            stop_on_error: false,
        }
    }
}

/// Outcome of one job within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub id: DbId,
    pub tenant_code: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Claimed by another executor first, already terminal, or not yet due.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// Result of one batch. `processed == succeeded + failed + skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub jobs: Vec<JobReport>,
}

impl RunSummary {
    fn record(&mut self, report: JobReport) {
        self.processed += 1;
        if report.skipped {
            self.skipped += 1;
        } else if report.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.jobs.push(report);
    }
}

/// The due job that has waited longest, without its progress data.
#[derive(Debug, Clone, Serialize)]
pub struct PendingJob {
    pub id: DbId,
    pub tenant_code: String,
    pub status: String,
    pub current_step: ProvisioningStep,
    pub attempts: i32,
    pub next_run_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl From<&ProvisioningJob> for PendingJob {
    fn from(job: &ProvisioningJob) -> Self {
        Self {
            id: job.id,
            tenant_code: job.tenant_code.clone(),
            status: job
                .status()
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| format!("unknown({})", job.status_id)),
            current_step: job.current_step,
            attempts: job.attempts,
            next_run_at: job.next_run_at,
            created_at: job.created_at,
        }
    }
}

/// Health probe answer.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub healthy: bool,
    pub pending_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_job: Option<PendingJob>,
}

// ---------------------------------------------------------------------------
// ProvisioningWorker
// ---------------------------------------------------------------------------

/// Picks up due jobs and hands each to the orchestrator, one at a time.
#[derive(Clone)]
pub struct ProvisioningWorker {
    orchestrator: Arc<Orchestrator>,
}

impl ProvisioningWorker {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Store health plus the due-job backlog.
    pub async fn status(&self) -> WorkerStatus {
        let store = self.orchestrator.store();
        let healthy = match store.health_check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Job store health check failed");
                false
            }
        };

        match store
            .pending_summary(self.orchestrator.config().lock_ttl)
            .await
        {
            Ok(summary) => WorkerStatus {
                healthy,
                pending_count: summary.due_count,
                oldest_pending_job: summary.oldest.as_ref().map(PendingJob::from),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to summarise pending jobs");
                WorkerStatus {
                    healthy: false,
                    pending_count: 0,
                    oldest_pending_job: None,
                }
            }
        }
    }

    /// Process one batch of due jobs.
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary, WorkerError> {
        self.run_batch(&options, None).await
    }

    /// Run batches until `cancel` fires.
    ///
    /// Sleeps `poll_interval` only after a batch that processed nothing. A
    /// cancellation lets the job in progress finish and starts no new one.
    pub async fn run_loop(
        &self,
        options: RunOptions,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        tracing::info!(
            batch_size = options.batch_size,
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Provisioning worker started"
        );

        while !cancel.is_cancelled() {
            let processed = match self.run_batch(&options, Some(&cancel)).await {
                Ok(summary) => summary.processed,
                Err(e) => {
                    tracing::error!(error = %e, "Worker batch failed");
                    0
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        tracing::info!("Provisioning worker shutting down");
    }

    async fn run_batch(
        &self,
        options: &RunOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunSummary, WorkerError> {
        let started = Instant::now();
        let due = self
            .orchestrator
            .store()
            .find_due(options.batch_size, self.orchestrator.config().lock_ttl)
            .await?;

        let mut summary = RunSummary::default();
        for job in due {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::info!("Worker cancelled, leaving remaining jobs for the next run");
                break;
            }
            if started.elapsed() >= options.max_duration {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    max_duration_ms = options.max_duration.as_millis() as u64,
                    "Worker time budget exhausted, stopping batch early"
                );
                break;
            }

            let report = self.process(&job).await;
            let stop = options.stop_on_error && !report.success;
            summary.record(report);
            if stop {
                tracing::warn!(job_id = job.id, "Stopping batch after failed job");
                break;
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        if summary.processed > 0 {
            tracing::info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                duration_ms = summary.duration_ms,
                "Worker batch finished"
            );
        }
        Ok(summary)
    }

    async fn process(&self, job: &ProvisioningJob) -> JobReport {
        let report = |success: bool, error: Option<String>, skipped: bool| JobReport {
            id: job.id,
            tenant_code: job.tenant_code.clone(),
            success,
            error,
            skipped,
        };

        match self.orchestrator.execute(job.id).await {
            Ok(ExecutionOutcome::Succeeded) => report(true, None, false),
            Ok(ExecutionOutcome::NotClaimed | ExecutionOutcome::Skipped) => {
                report(true, None, true)
            }
            Ok(ExecutionOutcome::Failed { error, .. }) => report(false, Some(error), false),
            Err(e) => {
                let error = sanitize_error(&e.to_string());
                tracing::error!(job_id = job.id, error = %error, "Job execution aborted");
                report(false, Some(error), false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn report(success: bool, skipped: bool) -> JobReport {
        JobReport {
            id: 1,
            tenant_code: "acme".into(),
            success,
            error: (!success).then(|| "boom".to_string()),
            skipped,
        }
    }

    #[test]
    fn summary_counts_add_up() {
        let mut summary = RunSummary::default();
        summary.record(report(true, false));
        summary.record(report(false, false));
        summary.record(report(true, true));

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            summary.processed,
            summary.succeeded + summary.failed + summary.skipped
        );
    }

    #[test]
    fn report_serialization_omits_empty_fields() {
        let json = serde_json::to_value(report(true, false)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 1, "tenant_code": "acme", "success": true})
        );

        let json = serde_json::to_value(report(false, false)).unwrap();
        assert_eq!(json["error"], "boom");
    }
}
