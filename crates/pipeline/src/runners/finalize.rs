use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use provisioner_core::progress::{self, keys};
use provisioner_core::steps::ProvisioningStep;

use crate::collaborators::{with_timeout, CollaboratorError, TenantRecords};
use crate::context::StepContext;
use crate::step::{StepResult, StepRunner};

/// Activates the local tenant record on its new database.
pub struct FinalizeRunner {
    pub records: Arc<dyn TenantRecords>,
    pub timeout: Duration,
}

impl FinalizeRunner {
    async fn finalize(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        let database = ctx.require_str(keys::DATABASE_NAME)?;
        with_timeout(
            self.timeout,
            "tenant activation",
            self.records.activate(ctx.tenant_id, database),
        )
        .await?;

        Ok(StepResult::ok(progress::patch([(
            keys::FINALIZED_AT,
            Utc::now().to_rfc3339(),
        )])))
    }
}

#[async_trait]
impl StepRunner for FinalizeRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::Finalize
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::FINALIZED_AT) {
            return StepResult::done();
        }
        self.finalize(ctx).await.into()
    }
}
