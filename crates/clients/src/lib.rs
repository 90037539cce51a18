//! Reference adapters for the collaborators the provisioning pipeline
//! talks to.
//!
//! The tenant database service, the tenant back-office instances and the
//! central back office all speak JSON-RPC 2.0 over HTTP ([`rpc`]). The
//! metadata registry is a plain REST endpoint and credentials go out via
//! SMTP. [`build_collaborators`] wires everything from [`ClientsConfig`].

pub mod backoffice;
pub mod config;
pub mod db_service;
pub mod email;
pub mod registry;
pub mod rpc;
pub mod tenant_instance;

use std::sync::Arc;
use std::time::Duration;

use provisioner_db::DbPool;
use provisioner_pipeline::collaborators::{CredentialMailer, Collaborators};
use provisioner_pipeline::records::PgTenantRecords;

pub use config::ClientsConfig;

use backoffice::RpcBackOffice;
use db_service::RpcDatabaseProvisioner;
use email::SmtpCredentialMailer;
use registry::HttpMetadataRegistry;
use rpc::{JsonRpcClient, RpcError};
use tenant_instance::RpcTenantInstance;

/// Build the production collaborator bundle.
///
/// `timeout` bounds every single HTTP request; the pipeline applies its own
/// per-call timeout on top. The mailer is only present when SMTP is
/// configured.
pub fn build_collaborators(
    pool: DbPool,
    config: &ClientsConfig,
    timeout: Duration,
) -> Result<Collaborators, RpcError> {
    let database = RpcDatabaseProvisioner::new(
        JsonRpcClient::new(&config.db_service_url, timeout)?,
        config.db_service_master_password.clone(),
    );
    let tenant_instance =
        RpcTenantInstance::new(JsonRpcClient::new(&config.tenant_rpc_url, timeout)?);
    let back_office = RpcBackOffice::new(
        JsonRpcClient::new(&config.backoffice_rpc_url, timeout)?,
        config.backoffice.clone(),
    );
    let metadata = HttpMetadataRegistry::new(
        &config.metadata_registry_url,
        config.metadata_registry_token.clone(),
        timeout,
    )?;
    let mailer = config
        .email
        .clone()
        .map(|email| Arc::new(SmtpCredentialMailer::new(email)) as Arc<dyn CredentialMailer>);

    if mailer.is_none() {
        tracing::info!("SMTP_HOST not set, credential emails are disabled");
    }

    Ok(Collaborators {
        database: Arc::new(database),
        tenant_instance: Arc::new(tenant_instance),
        back_office: Arc::new(back_office),
        metadata: Arc::new(metadata),
        mailer,
        records: Arc::new(PgTenantRecords::new(pool)),
    })
}
