use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use provisioner_core::progress::{self, keys};
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::tenant::validate_tenant_code;

use crate::collaborators::{with_timeout, CollaboratorError, TenantRecords};
use crate::context::StepContext;
use crate::step::{StepResult, StepRunner};

/// Checks the tenant exists and matches the job, records its name.
pub struct InitRunner {
    pub records: Arc<dyn TenantRecords>,
    pub timeout: Duration,
}

impl InitRunner {
    async fn init(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        validate_tenant_code(&ctx.tenant_code)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))?;

        let profile = with_timeout(
            self.timeout,
            "tenant lookup",
            self.records.tenant_profile(ctx.tenant_id),
        )
        .await?
        .ok_or_else(|| {
            CollaboratorError::MissingInput(format!("tenant {} does not exist", ctx.tenant_id))
        })?;

        if profile.code != ctx.tenant_code {
            return Err(CollaboratorError::Rejected(format!(
                "tenant {} has code '{}', job was created for '{}'",
                profile.id, profile.code, ctx.tenant_code
            )));
        }

        Ok(StepResult::ok(progress::patch([
            (keys::INITIALIZED_AT, Utc::now().to_rfc3339()),
            (keys::TENANT_NAME, profile.name),
        ])))
    }
}

#[async_trait]
impl StepRunner for InitRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::Init
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::INITIALIZED_AT) {
            return StepResult::done();
        }
        self.init(ctx).await.into()
    }
}
