//! Steps run against the central back office.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::progress::{self, keys};
use provisioner_core::steps::ProvisioningStep;

use crate::collaborators::{
    with_timeout, BackOffice, CollaboratorError, RemoteTenant, RemoteUser, TenantRecords,
};
use crate::context::StepContext;
use crate::step::{StepResult, StepRunner};

// ---------------------------------------------------------------------------
// upsert_tenant
// ---------------------------------------------------------------------------

pub struct UpsertTenantRunner {
    pub back_office: Arc<dyn BackOffice>,
    pub timeout: Duration,
}

impl UpsertTenantRunner {
    async fn upsert(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        let record = RemoteTenant {
            code: ctx.tenant_code.clone(),
            name: ctx
                .get_str(keys::TENANT_NAME)
                .unwrap_or(ctx.tenant_code.as_str())
                .to_string(),
            database_name: ctx.require_str(keys::DATABASE_NAME)?.to_string(),
        };

        let upserted = with_timeout(
            self.timeout,
            "back-office tenant upsert",
            self.back_office.upsert_tenant(&record),
        )
        .await;

        let remote_id = match upserted {
            Ok(id) => id,
            Err(CollaboratorError::AlreadyExists(_)) => with_timeout(
                self.timeout,
                "back-office tenant lookup",
                self.back_office.find_tenant(&ctx.tenant_code),
            )
            .await?
            .ok_or_else(|| {
                CollaboratorError::Rejected(format!(
                    "back office reports tenant '{}' exists but cannot find it",
                    ctx.tenant_code
                ))
            })?,
            Err(e) => return Err(e),
        };

        Ok(StepResult::ok(progress::patch([(
            keys::REMOTE_TENANT_ID,
            remote_id,
        )])))
    }
}

#[async_trait]
impl StepRunner for UpsertTenantRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::UpsertTenant
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::REMOTE_TENANT_ID) {
            return StepResult::done();
        }
        self.upsert(ctx).await.into()
    }
}

// ---------------------------------------------------------------------------
// register_billing
// ---------------------------------------------------------------------------

/// Registers metered billing when the back office has the billing module.
pub struct RegisterBillingRunner {
    pub back_office: Arc<dyn BackOffice>,
    pub timeout: Duration,
}

impl RegisterBillingRunner {
    async fn register(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        let remote_id = ctx.require_i64(keys::REMOTE_TENANT_ID)?;

        let registered = with_timeout(
            self.timeout,
            "metered billing registration",
            self.back_office.register_metered_billing(remote_id),
        )
        .await;

        match registered {
            Ok(()) | Err(CollaboratorError::AlreadyExists(_)) => Ok(StepResult::ok(
                progress::patch([(keys::BILLING_REGISTERED, true)]),
            )),
            Err(CollaboratorError::NotInstalled(what)) => {
                tracing::info!(
                    job_id = ctx.job_id,
                    tenant_code = %ctx.tenant_code,
                    capability = %what,
                    "Metered billing not available, skipping"
                );
                Ok(StepResult::done())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StepRunner for RegisterBillingRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::RegisterBilling
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::BILLING_REGISTERED) {
            return StepResult::done();
        }
        self.register(ctx).await.into()
    }
}

// ---------------------------------------------------------------------------
// upsert_user
// ---------------------------------------------------------------------------

/// Mirrors the requesting user into the back office.
pub struct UpsertUserRunner {
    pub back_office: Arc<dyn BackOffice>,
    pub records: Arc<dyn TenantRecords>,
    pub timeout: Duration,
}

impl UpsertUserRunner {
    async fn upsert(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        let Some(user_id) = ctx.user_id else {
            tracing::info!(
                job_id = ctx.job_id,
                "No requesting user on job, skipping back-office user"
            );
            return Ok(StepResult::done());
        };
        let remote_tenant_id = ctx.require_i64(keys::REMOTE_TENANT_ID)?;

        let profile = with_timeout(
            self.timeout,
            "user lookup",
            self.records.user_profile(user_id),
        )
        .await?
        .ok_or_else(|| CollaboratorError::MissingInput(format!("user {user_id} does not exist")))?;

        let user = RemoteUser {
            email: profile.email,
            full_name: profile.full_name,
        };
        let upserted = with_timeout(
            self.timeout,
            "back-office user upsert",
            self.back_office.upsert_user(remote_tenant_id, &user),
        )
        .await;

        match upserted {
            Ok(remote_id) => Ok(StepResult::ok(progress::patch([(
                keys::REMOTE_USER_ID,
                remote_id,
            )]))),
            Err(CollaboratorError::AlreadyExists(_)) => {
                // Nothing to record; a rerun repeats the idempotent upsert.
                tracing::info!(job_id = ctx.job_id, "Back-office user already present");
                Ok(StepResult::done())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StepRunner for UpsertUserRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::UpsertUser
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::REMOTE_USER_ID) {
            return StepResult::done();
        }
        self.upsert(ctx).await.into()
    }
}
