//! Per-execution state handed to every step runner.

use provisioner_core::progress::{self, ProgressData};
use provisioner_core::types::DbId;
use provisioner_db::models::provisioning_job::ProvisioningJob;

use crate::collaborators::CollaboratorError;

/// Identity of the job being executed plus the progress accumulated so far.
///
/// The orchestrator merges each successful step's output into
/// `progress_data` before the next step runs.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: DbId,
    pub tenant_id: DbId,
    pub tenant_code: String,
    pub user_id: Option<DbId>,
    /// Attempt number of this execution, starting at 1.
    pub attempt: i32,
    pub progress_data: ProgressData,
}

impl StepContext {
    pub fn from_job(job: &ProvisioningJob) -> Self {
        Self {
            job_id: job.id,
            tenant_id: job.tenant_id,
            tenant_code: job.tenant_code.clone(),
            user_id: job.user_id,
            attempt: job.attempts + 1,
            progress_data: job.progress_data.clone(),
        }
    }

    /// Whether an earlier execution already left `marker`.
    pub fn has_marker(&self, marker: &str) -> bool {
        progress::has_marker(&self.progress_data, marker)
    }

    /// A string output of an earlier step.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        progress::get_str(&self.progress_data, key)
    }

    /// Like [`Self::get_str`], failing with `MissingInput` when absent.
    pub fn require_str(&self, key: &str) -> Result<&str, CollaboratorError> {
        self.get_str(key).ok_or_else(|| {
            CollaboratorError::MissingInput(format!("progress data has no '{key}'"))
        })
    }

    /// Integer output of an earlier step, failing with `MissingInput` when
    /// absent.
    pub fn require_i64(&self, key: &str) -> Result<i64, CollaboratorError> {
        progress::get_i64(&self.progress_data, key).ok_or_else(|| {
            CollaboratorError::MissingInput(format!("progress data has no '{key}'"))
        })
    }
}
