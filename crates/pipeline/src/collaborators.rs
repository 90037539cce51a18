//! Abstract interfaces to every system outside the engine.
//!
//! Step runners depend only on these traits. Adapters translate whatever
//! their remote system reports into a [`CollaboratorError`] kind, so runners
//! branch on structured kinds and never on message text.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::types::DbId;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured failure kinds shared by every collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The resource already exists. Treated as success by idempotent steps.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// An optional capability is not installed on the remote system.
    #[error("Not installed: {0}")]
    NotInstalled(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The remote system refused the request (validation, business rule).
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Transport failure or the remote system is down.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Input required for the call was not available.
    #[error("Missing input: {0}")]
    MissingInput(String),
}

/// Run `fut`, converting an elapsed `limit` into [`CollaboratorError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(format!(
            "{what} did not answer within {}s",
            limit.as_secs()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Data exchanged with collaborators
// ---------------------------------------------------------------------------

/// Authenticated session on a tenant database.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub database: String,
    pub uid: i64,
    pub token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.database)
            .field("uid", &self.uid)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Local tenant record as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantProfile {
    pub id: DbId,
    pub code: String,
    pub name: String,
    pub database_name: Option<String>,
}

/// Local user record as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: DbId,
    pub email: String,
    pub full_name: String,
}

/// Tenant record pushed to the central back office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTenant {
    pub code: String,
    pub name: String,
    pub database_name: String,
}

/// User record pushed to the central back office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteUser {
    pub email: String,
    pub full_name: String,
}

/// Metadata published to the tenant registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantMetadata {
    pub code: String,
    pub name: String,
    pub database_name: String,
    pub remote_tenant_id: Option<i64>,
}

/// Everything the credentials email needs.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialNotice {
    pub to_email: String,
    pub to_name: String,
    pub tenant_code: String,
    pub tenant_name: String,
    pub database_name: String,
    pub login: String,
    pub password: String,
}

impl fmt::Debug for CredentialNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialNotice")
            .field("to_email", &self.to_email)
            .field("tenant_code", &self.tenant_code)
            .field("database_name", &self.database_name)
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Copies the template database into a tenant database.
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    /// Create `target` as a copy of `template`. An existing `target` must be
    /// reported as [`CollaboratorError::AlreadyExists`].
    async fn copy_template(&self, template: &str, target: &str) -> Result<(), CollaboratorError>;
}

/// The tenant's own back-office database.
#[async_trait]
pub trait TenantInstance: Send + Sync {
    async fn authenticate(
        &self,
        database: &str,
        login: &str,
        password: &str,
    ) -> Result<Session, CollaboratorError>;

    async fn set_admin_password(
        &self,
        session: &Session,
        login: &str,
        new_password: &str,
    ) -> Result<(), CollaboratorError>;

    /// Mint an API key. Optional capability: may return
    /// [`CollaboratorError::NotInstalled`].
    async fn create_api_key(&self, session: &Session, name: &str)
        -> Result<String, CollaboratorError>;
}

/// The central back office shared by all tenants.
#[async_trait]
pub trait BackOffice: Send + Sync {
    /// Create or update the tenant; returns its remote id.
    async fn upsert_tenant(&self, tenant: &RemoteTenant) -> Result<i64, CollaboratorError>;

    async fn find_tenant(&self, code: &str) -> Result<Option<i64>, CollaboratorError>;

    /// Optional capability: may return [`CollaboratorError::NotInstalled`].
    async fn register_metered_billing(&self, remote_tenant_id: i64)
        -> Result<(), CollaboratorError>;

    /// Create or update a user attached to the tenant; returns its remote id.
    async fn upsert_user(
        &self,
        remote_tenant_id: i64,
        user: &RemoteUser,
    ) -> Result<i64, CollaboratorError>;
}

#[async_trait]
pub trait MetadataRegistry: Send + Sync {
    async fn upsert_tenant_metadata(
        &self,
        code: &str,
        metadata: &TenantMetadata,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait CredentialMailer: Send + Sync {
    async fn send_credentials(&self, notice: &CredentialNotice) -> Result<(), CollaboratorError>;
}

/// Local tenant and user tables.
#[async_trait]
pub trait TenantRecords: Send + Sync {
    async fn tenant_profile(&self, tenant_id: DbId)
        -> Result<Option<TenantProfile>, CollaboratorError>;

    async fn user_profile(&self, user_id: DbId) -> Result<Option<UserProfile>, CollaboratorError>;

    /// Mark the tenant active on `database_name`. Idempotent.
    async fn activate(&self, tenant_id: DbId, database_name: &str)
        -> Result<(), CollaboratorError>;
}

/// The full set of collaborators handed to the standard step runners.
#[derive(Clone)]
pub struct Collaborators {
    pub database: Arc<dyn DatabaseProvisioner>,
    pub tenant_instance: Arc<dyn TenantInstance>,
    pub back_office: Arc<dyn BackOffice>,
    pub metadata: Arc<dyn MetadataRegistry>,
    /// `None` when no mail transport is configured; the notify step is then
    /// skipped.
    pub mailer: Option<Arc<dyn CredentialMailer>>,
    pub records: Arc<dyn TenantRecords>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_maps_elapsed_to_timeout_kind() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CollaboratorError::Timeout(_))));
    }

    #[tokio::test]
    async fn with_timeout_passes_results_through() {
        let ok = with_timeout(Duration::from_secs(1), "fast call", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<(), _> = with_timeout(Duration::from_secs(1), "rejecting call", async {
            Err(CollaboratorError::Rejected("nope".into()))
        })
        .await;
        assert_eq!(err, Err(CollaboratorError::Rejected("nope".into())));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let session = Session {
            database: "tenant_acme".into(),
            uid: 2,
            token: "tok-secret".into(),
        };
        assert!(!format!("{session:?}").contains("tok-secret"));

        let notice = CredentialNotice {
            to_email: "a@example.com".into(),
            to_name: "A".into(),
            tenant_code: "acme".into(),
            tenant_name: "Acme".into(),
            database_name: "tenant_acme".into(),
            login: "admin".into(),
            password: "pw-secret".into(),
        };
        assert!(!format!("{notice:?}").contains("pw-secret"));
    }
}
