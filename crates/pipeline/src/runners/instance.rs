//! Steps run against the tenant's own back-office database.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::credentials::generate_password;
use provisioner_core::progress::{self, keys, ProgressData};
use provisioner_core::steps::ProvisioningStep;
use serde_json::Value;

use super::session_from;
use crate::collaborators::{with_timeout, CollaboratorError, Session, TenantInstance};
use crate::context::StepContext;
use crate::step::{StepResult, StepRunner};

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Opens admin sessions on a tenant database.
///
/// Shared by every step that talks to the tenant instance, so a step resumed
/// long after `authenticate` ran can replace an expired token.
#[derive(Clone)]
pub struct SessionOpener {
    pub instance: Arc<dyn TenantInstance>,
    pub login: String,
    pub template_password: String,
    pub timeout: Duration,
}

impl SessionOpener {
    async fn open(&self, ctx: &StepContext) -> Result<Session, CollaboratorError> {
        let database = ctx.require_str(keys::DATABASE_NAME)?;
        // After a rotation the template password no longer works.
        let password = ctx
            .get_str(keys::ADMIN_PASSWORD)
            .unwrap_or(self.template_password.as_str());

        with_timeout(
            self.timeout,
            "tenant authentication",
            self.instance.authenticate(database, &self.login, password),
        )
        .await
    }

    /// Runs `call` with the recorded session. When the instance rejects it,
    /// opens a new session and runs `call` once more.
    ///
    /// Returns the new session alongside the value when one was opened.
    async fn with_session<T, F, Fut>(
        &self,
        ctx: &StepContext,
        call: F,
    ) -> Result<(T, Option<Session>), CollaboratorError>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        match call(session_from(ctx)?).await {
            Err(CollaboratorError::Unauthorized(reason)) => {
                tracing::info!(
                    job_id = ctx.job_id,
                    tenant_code = %ctx.tenant_code,
                    reason = %reason,
                    "Recorded session rejected, re-authenticating"
                );
                let session = self.open(ctx).await?;
                let value = call(session.clone()).await?;
                Ok((value, Some(session)))
            }
            other => other.map(|value| (value, None)),
        }
    }
}

/// Progress entries recording `session`.
fn session_patch(session: &Session) -> ProgressData {
    progress::patch([
        (keys::SESSION_TOKEN, Value::from(session.token.clone())),
        (keys::ADMIN_UID, Value::from(session.uid)),
    ])
}

/// `patch` plus the entries of a session opened along the way.
fn with_refreshed(mut patch: ProgressData, session: Option<Session>) -> ProgressData {
    if let Some(session) = session {
        patch.extend(session_patch(&session));
    }
    patch
}

// ---------------------------------------------------------------------------
// authenticate
// ---------------------------------------------------------------------------

/// Opens an admin session on the freshly copied database.
pub struct AuthenticateRunner {
    pub sessions: SessionOpener,
}

impl AuthenticateRunner {
    async fn authenticate(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        let session = self.sessions.open(ctx).await?;
        Ok(StepResult::ok(session_patch(&session)))
    }
}

#[async_trait]
impl StepRunner for AuthenticateRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::Authenticate
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::SESSION_TOKEN) {
            return StepResult::done();
        }
        self.authenticate(ctx).await.into()
    }
}

// ---------------------------------------------------------------------------
// configure_admin
// ---------------------------------------------------------------------------

/// Replaces the template admin password with a generated one.
pub struct ConfigureAdminRunner {
    pub sessions: SessionOpener,
}

impl ConfigureAdminRunner {
    async fn configure(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        let password = generate_password();
        let new_password = password.as_str();
        let instance = &self.sessions.instance;
        let login = self.sessions.login.as_str();
        let timeout = self.sessions.timeout;

        let ((), refreshed) = self
            .sessions
            .with_session(ctx, move |session| async move {
                with_timeout(
                    timeout,
                    "admin password update",
                    instance.set_admin_password(&session, login, new_password),
                )
                .await
            })
            .await?;

        let patch = progress::patch([
            (keys::ADMIN_LOGIN, login.to_string()),
            (keys::ADMIN_PASSWORD, password),
        ]);
        Ok(StepResult::ok(with_refreshed(patch, refreshed)))
    }
}

#[async_trait]
impl StepRunner for ConfigureAdminRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::ConfigureAdmin
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::ADMIN_PASSWORD) {
            return StepResult::done();
        }
        self.configure(ctx).await.into()
    }
}

// ---------------------------------------------------------------------------
// configure_api_key
// ---------------------------------------------------------------------------

/// Mints an API key when the tenant database supports it.
pub struct ConfigureApiKeyRunner {
    pub sessions: SessionOpener,
    pub key_name: String,
}

impl ConfigureApiKeyRunner {
    async fn configure(&self, ctx: &StepContext) -> Result<StepResult, CollaboratorError> {
        let instance = &self.sessions.instance;
        let key_name = self.key_name.as_str();
        let timeout = self.sessions.timeout;

        let created = self
            .sessions
            .with_session(ctx, move |session| async move {
                with_timeout(
                    timeout,
                    "API key creation",
                    instance.create_api_key(&session, key_name),
                )
                .await
            })
            .await;

        match created {
            Ok((key, refreshed)) => Ok(StepResult::ok(with_refreshed(
                progress::patch([(keys::API_KEY, key)]),
                refreshed,
            ))),
            Err(CollaboratorError::NotInstalled(what)) => {
                tracing::info!(
                    job_id = ctx.job_id,
                    tenant_code = %ctx.tenant_code,
                    capability = %what,
                    "API keys not supported by tenant database, skipping"
                );
                Ok(StepResult::done())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StepRunner for ConfigureApiKeyRunner {
    fn step(&self) -> ProvisioningStep {
        ProvisioningStep::ConfigureApiKey
    }

    async fn run(&self, ctx: &StepContext) -> StepResult {
        if ctx.has_marker(keys::API_KEY) {
            return StepResult::done();
        }
        self.configure(ctx).await.into()
    }
}
