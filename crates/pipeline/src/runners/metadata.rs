use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::progress::{self, keys};
use provisioner_core::steps::ProvisioningStep;

use crate::collaborators::{with_timeout, CollaboratorError, MetadataRegistry, TenantMetadata};
use crate::context::StepContext;
use crate::step::{StepResult, StepRunner};

/// Publishes tenant metadata. Failure does not fail the job.
pub struct PublishMetadataRunner {
    pub registry: Arc<dyn MetadataRegistry>,
    pub timeout: Duration,
}

impl PublishMetadataRunner {
    async fn publish(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        let metadata = TenantMetadata {
            code: ctx.tenant_code.clone(),
            name: ctx
                .get_str(keys::TENANT_NAME)
                .unwrap_or(ctx.tenant_code.as_str())
                .to_string(),
            database_name: ctx.require_str(keys::DATABASE_NAME)?.to_string(),
            remote_tenant_id: progress::get_i64(&ctx.progress_data, keys::REMOTE_TENANT_ID),
        };

        with_timeout(
            self.timeout,
            "metadata registry",
            self.registry
                .upsert_tenant_metadata(&ctx.tenant_code, &metadata),
        )
        .await?;

        Ok(StepResult::ok(progress::patch([(
            keys::METADATA_PUBLISHED,
            true,
        )])))
    }
}

#[async_trait]
impl StepRunner for PublishMetadataRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::PublishMetadata
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::METADATA_PUBLISHED) {
            return StepResult::done();
        }
        self.publish(ctx).await.into()
    }
}
