//! The standard step runners, one per pipeline step.
//!
//! Every runner follows the same rules: return early when its completion
//! marker is already in the progress data, treat `AlreadyExists` as success,
//! treat `NotInstalled` on optional capabilities as an explicit skip, and
//! bound every collaborator call with the configured timeout.

use std::sync::Arc;

use provisioner_core::progress::keys;

use crate::collaborators::{CollaboratorError, Collaborators, Session};
use crate::config::PipelineConfig;
use crate::context::StepContext;
use crate::registry::{RegistryError, StepRegistry};

mod back_office;
mod database;
mod finalize;
mod init;
mod instance;
mod metadata;
mod notify;

pub use back_office::{RegisterBillingRunner, UpsertTenantRunner, UpsertUserRunner};
pub use database::CopyDatabaseRunner;
pub use finalize::FinalizeRunner;
pub use init::InitRunner;
pub use instance::{
    AuthenticateRunner, ConfigureAdminRunner, ConfigureApiKeyRunner, SessionOpener,
};
pub use metadata::PublishMetadataRunner;
pub use notify::NotifyRunner;

/// Registry with the standard runner for every pipeline step.
pub fn standard_registry(
    collaborators: &Collaborators,
    config: &PipelineConfig,
) -> Result<StepRegistry, RegistryError> {
    let timeout = config.call_timeout;
    let sessions = SessionOpener {
        instance: collaborators.tenant_instance.clone(),
        login: config.admin_login.clone(),
        template_password: config.template_admin_password.clone(),
        timeout,
    };
    StepRegistry::builder()
        .register(Arc::new(InitRunner {
            records: collaborators.records.clone(),
            timeout,
        }))
        .register(Arc::new(CopyDatabaseRunner {
            database: collaborators.database.clone(),
            template: config.template_database.clone(),
            prefix: config.database_prefix.clone(),
            timeout,
        }))
        .register(Arc::new(AuthenticateRunner {
            sessions: sessions.clone(),
        }))
        .register(Arc::new(ConfigureAdminRunner {
            sessions: sessions.clone(),
        }))
        .register(Arc::new(ConfigureApiKeyRunner {
            sessions,
            key_name: config.api_key_name.clone(),
        }))
        .register(Arc::new(UpsertTenantRunner {
            back_office: collaborators.back_office.clone(),
            timeout,
        }))
        .register(Arc::new(RegisterBillingRunner {
            back_office: collaborators.back_office.clone(),
            timeout,
        }))
        .register(Arc::new(UpsertUserRunner {
            back_office: collaborators.back_office.clone(),
            records: collaborators.records.clone(),
            timeout,
        }))
        .register(Arc::new(PublishMetadataRunner {
            registry: collaborators.metadata.clone(),
            timeout,
        }))
        .register(Arc::new(FinalizeRunner {
            records: collaborators.records.clone(),
            timeout,
        }))
        .register(Arc::new(NotifyRunner {
            mailer: collaborators.mailer.clone(),
            records: collaborators.records.clone(),
            timeout,
        }))
        .build()
}

/// Rebuild the admin session recorded by the authenticate step.
fn session_from(ctx: &StepContext) -> Result<Session, CollaboratorError> {
    Ok(Session {
        database: ctx.require_str(keys::DATABASE_NAME)?.to_string(),
        uid: ctx.require_i64(keys::ADMIN_UID)?,
        token: ctx.require_str(keys::SESSION_TOKEN)?.to_string(),
    })
}
