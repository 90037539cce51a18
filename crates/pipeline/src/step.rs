//! The step runner contract.

use async_trait::async_trait;
use provisioner_core::progress::ProgressData;
use provisioner_core::steps::ProvisioningStep;
use serde::Serialize;

use crate::collaborators::CollaboratorError;
use crate::context::StepContext;

/// Outcome of one step: `{ success, error?, data? }`.
///
/// `data` is a partial patch merged into the job's progress data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ProgressData>,
}

impl StepResult {
    /// Success carrying output data.
    pub fn ok(data: ProgressData) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    /// Success with nothing to record (already done, or skipped).
    pub fn done() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

impl From<Result<StepResult, CollaboratorError>> for StepResult {
    /// Collapse a runner body written with `?` into the result contract.
    fn from(result: Result<StepResult, CollaboratorError>) -> Self {
        result.unwrap_or_else(|e| StepResult::failed(e.to_string()))
    }
}

/// Performs the side effect of exactly one [`ProvisioningStep`].
///
/// Runners check the progress data for their completion marker first and
/// return without side effects when it is present.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// The step this runner handles.
    fn step(&self) -> ProvisioningStep;

    async fn run(&self, ctx: &StepContext) -> StepResult;
}

#[cfg(test)]
mod tests {
    use provisioner_core::progress::{self, keys};
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_to_the_result_contract() {
        let ok = StepResult::ok(progress::patch([(keys::DATABASE_NAME, "tenant_acme")]));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"success": true, "data": {"database_name": "tenant_acme"}})
        );

        let failed = StepResult::failed("boom");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"success": false, "error": "boom"})
        );
    }

    #[test]
    fn collaborator_errors_become_failures() {
        let result: StepResult = Err(CollaboratorError::Timeout("copy".into())).into();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Timed out: copy"));
    }
}
