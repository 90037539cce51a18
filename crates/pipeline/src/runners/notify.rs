use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::progress::{self, keys};
use provisioner_core::steps::ProvisioningStep;

use crate::collaborators::{
    with_timeout, CollaboratorError, CredentialMailer, CredentialNotice, TenantRecords,
};
use crate::context::StepContext;
use crate::step::{StepResult, StepRunner};

/// Emails the generated admin credentials to the requesting user.
///
/// Skipped when no mailer is configured or the job has no user.
pub struct NotifyRunner {
    pub mailer: Option<Arc<dyn CredentialMailer>>,
    pub records: Arc<dyn TenantRecords>,
    pub timeout: Duration,
}

impl NotifyRunner {
    async fn notify(
        &self,
        mailer: &dyn CredentialMailer,
        user_id: i64,
        ctx: &StepContext,
    ) -> Result<StepResult, CollaboratorError> {
        let user = with_timeout(
            self.timeout,
            "user lookup",
            self.records.user_profile(user_id),
        )
        .await?
        .ok_or_else(|| CollaboratorError::MissingInput(format!("user {user_id} does not exist")))?;

        let notice = CredentialNotice {
            to_email: user.email,
            to_name: user.full_name,
            tenant_code: ctx.tenant_code.clone(),
            tenant_name: ctx
                .get_str(keys::TENANT_NAME)
                .unwrap_or(ctx.tenant_code.as_str())
                .to_string(),
            database_name: ctx.require_str(keys::DATABASE_NAME)?.to_string(),
            login: ctx.require_str(keys::ADMIN_LOGIN)?.to_string(),
            password: ctx.require_str(keys::ADMIN_PASSWORD)?.to_string(),
        };

        with_timeout(self.timeout, "credentials email", mailer.send_credentials(&notice)).await?;

        Ok(StepResult::ok(progress::patch([(
            keys::CREDENTIALS_SENT,
            true,
        )])))
    }
}

#[async_trait]
impl StepRunner for NotifyRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::Notify
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::CREDENTIALS_SENT) {
            return StepResult::done();
        }
        let Some(mailer) = &self.mailer else {
            tracing::info!(
                job_id = ctx.job_id,
                "No mail transport configured, skipping credentials email"
            );
            return StepResult::done();
        };
        let Some(user_id) = ctx.user_id else {
            tracing::info!(
                job_id = ctx.job_id,
                "No requesting user on job, skipping credentials email"
            );
            return StepResult::done();
        };
        self.notify(mailer.as_ref(), user_id, ctx).await.into()
    }
}
