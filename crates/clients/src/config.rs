//! Endpoints and credentials for the external systems.

use provisioner_pipeline::config::{env_optional, env_required, ConfigError};

use crate::backoffice::BackOfficeCredentials;
use crate::email::EmailConfig;

/// Configuration for every reference adapter.
///
/// Holds credentials and is not `Debug`.
#[derive(Clone)]
pub struct ClientsConfig {
    /// JSON-RPC endpoint of the database manager service.
    pub db_service_url: String,
    pub db_service_master_password: String,
    /// JSON-RPC endpoint serving the tenant databases.
    pub tenant_rpc_url: String,
    /// JSON-RPC endpoint of the central back office.
    pub backoffice_rpc_url: String,
    pub backoffice: BackOfficeCredentials,
    pub metadata_registry_url: String,
    pub metadata_registry_token: Option<String>,
    /// `None` disables credential emails.
    pub email: Option<EmailConfig>,
}

impl ClientsConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                      | Required |
    /// |------------------------------|----------|
    /// | `DB_SERVICE_URL`             | yes      |
    /// | `DB_SERVICE_MASTER_PASSWORD` | yes      |
    /// | `TENANT_RPC_URL`             | yes      |
    /// | `BACKOFFICE_RPC_URL`         | yes      |
    /// | `BACKOFFICE_DATABASE`        | yes      |
    /// | `BACKOFFICE_LOGIN`           | yes      |
    /// | `BACKOFFICE_PASSWORD`        | yes      |
    /// | `METADATA_REGISTRY_URL`      | yes      |
    /// | `METADATA_REGISTRY_TOKEN`    | no       |
    ///
    /// SMTP settings are read by [`EmailConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            db_service_url: env_required("DB_SERVICE_URL")?,
            db_service_master_password: env_required("DB_SERVICE_MASTER_PASSWORD")?,
            tenant_rpc_url: env_required("TENANT_RPC_URL")?,
            backoffice_rpc_url: env_required("BACKOFFICE_RPC_URL")?,
            backoffice: BackOfficeCredentials {
                database: env_required("BACKOFFICE_DATABASE")?,
                login: env_required("BACKOFFICE_LOGIN")?,
                password: env_required("BACKOFFICE_PASSWORD")?,
            },
            metadata_registry_url: env_required("METADATA_REGISTRY_URL")?,
            metadata_registry_token: env_optional("METADATA_REGISTRY_TOKEN"),
            email: EmailConfig::from_env(),
        })
    }
}
