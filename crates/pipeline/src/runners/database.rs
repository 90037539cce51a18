use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::progress::{self, keys};
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::tenant::database_name;

use crate::collaborators::{with_timeout, CollaboratorError, DatabaseProvisioner};
use crate::context::StepContext;
use crate::step::{StepResult, StepRunner};

/// Copies the template database into `{prefix}{tenant_code}`.
pub struct CopyDatabaseRunner {
    pub database: Arc<dyn DatabaseProvisioner>,
    pub template: String,
    pub prefix: String,
    pub timeout: Duration,
}

#[async_trait]
impl StepRunner for CopyDatabaseRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::CopyDatabase
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::DATABASE_NAME) {
            return StepResult::done();
        }

        let target = database_name(&self.prefix, &ctx.tenant_code);
        let copied = with_timeout(
            self.timeout,
            "database copy",
            self.database.copy_template(&self.template, &target),
        )
        .await;

        match copied {
            Ok(()) => {}
            Err(CollaboratorError::AlreadyExists(_)) => {
                tracing::info!(
                    job_id = ctx.job_id,
                    database = %target,
                    "Tenant database already exists, reusing it"
                );
            }
            Err(e) => return StepResult::failed(e.to_string()),
        }

        StepResult::ok(progress::patch([(keys::DATABASE_NAME, target)]))
    }
}
