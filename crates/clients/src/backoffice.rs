//! Tenant and user records in the central back office.

use async_trait::async_trait;
use provisioner_pipeline::collaborators::{BackOffice, CollaboratorError, RemoteTenant, RemoteUser};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::rpc::{JsonRpcClient, RpcError};

const TENANT_MODEL: &str = "tenant.tenant";
const TENANT_USER_MODEL: &str = "tenant.user";
const BILLING_MODEL: &str = "tenant.billing";

/// Service account used for every back-office call.
#[derive(Clone)]
pub struct BackOfficeCredentials {
    pub database: String,
    pub login: String,
    pub password: String,
}

impl std::fmt::Debug for BackOfficeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackOfficeCredentials")
            .field("database", &self.database)
            .field("login", &self.login)
            .field("password", &provisioner_core::redact::REDACTED)
            .finish()
    }
}

/// [`BackOffice`] over the central server's JSON-RPC endpoint.
///
/// Logs in once on first use and caches the resulting user id.
pub struct RpcBackOffice {
    rpc: JsonRpcClient,
    credentials: BackOfficeCredentials,
    uid: OnceCell<i64>,
}

impl RpcBackOffice {
    pub fn new(rpc: JsonRpcClient, credentials: BackOfficeCredentials) -> Self {
        Self {
            rpc,
            credentials,
            uid: OnceCell::new(),
        }
    }

    async fn uid(&self) -> Result<i64, CollaboratorError> {
        let uid = self
            .uid
            .get_or_try_init(|| async {
                let creds = &self.credentials;
                let result: Value = self
                    .rpc
                    .service(
                        "common",
                        "login",
                        json!([creds.database, creds.login, creds.password]),
                    )
                    .await
                    .map_err(translate)?;
                result.as_i64().ok_or_else(|| {
                    CollaboratorError::Unauthorized(format!(
                        "back office rejected service login '{}'",
                        creds.login
                    ))
                })
            })
            .await?;
        Ok(*uid)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        model: &str,
        method: &str,
        args: Value,
    ) -> Result<T, CollaboratorError> {
        let uid = self.uid().await?;
        let creds = &self.credentials;
        self.rpc
            .service(
                "object",
                "execute_kw",
                json!([creds.database, uid, creds.password, model, method, args]),
            )
            .await
            .map_err(translate)
    }

    async fn search_one(&self, model: &str, domain: Value) -> Result<Option<i64>, CollaboratorError> {
        let ids: Vec<i64> = self.execute(model, "search", json!([domain])).await?;
        Ok(ids.into_iter().next())
    }

    /// Update the record matching `domain`, or create it.
    async fn upsert(&self, model: &str, domain: Value, values: Value) -> Result<i64, CollaboratorError> {
        if let Some(id) = self.search_one(model, domain).await? {
            let _: Value = self.execute(model, "write", json!([[id], values])).await?;
            return Ok(id);
        }
        self.execute(model, "create", json!([values])).await
    }
}

#[async_trait]
impl BackOffice for RpcBackOffice {
    async fn upsert_tenant(&self, tenant: &RemoteTenant) -> Result<i64, CollaboratorError> {
        let id = self
            .upsert(
                TENANT_MODEL,
                json!([["code", "=", tenant.code]]),
                json!({
                    "code": tenant.code,
                    "name": tenant.name,
                    "database_name": tenant.database_name,
                }),
            )
            .await?;
        tracing::info!(tenant_code = %tenant.code, remote_tenant_id = id, "Back-office tenant upserted");
        Ok(id)
    }

    async fn find_tenant(&self, code: &str) -> Result<Option<i64>, CollaboratorError> {
        self.search_one(TENANT_MODEL, json!([["code", "=", code]]))
            .await
    }

    async fn register_metered_billing(&self, remote_tenant_id: i64) -> Result<(), CollaboratorError> {
        let _: Value = self
            .execute(BILLING_MODEL, "register_metered", json!([[remote_tenant_id]]))
            .await?;
        Ok(())
    }

    async fn upsert_user(
        &self,
        remote_tenant_id: i64,
        user: &RemoteUser,
    ) -> Result<i64, CollaboratorError> {
        self.upsert(
            TENANT_USER_MODEL,
            json!([
                ["tenant_id", "=", remote_tenant_id],
                ["email", "=", user.email]
            ]),
            json!({
                "tenant_id": remote_tenant_id,
                "email": user.email,
                "name": user.full_name,
            }),
        )
        .await
    }
}

/// Map a back-office failure to a collaborator error kind.
fn translate(err: RpcError) -> CollaboratorError {
    if let RpcError::Fault { message, .. } = &err {
        let lower = message.to_lowercase();
        if lower.contains("already exists")
            || lower.contains("already registered")
            || lower.contains("duplicate key")
        {
            return CollaboratorError::AlreadyExists(message.clone());
        }
        if lower.contains("access denied") || lower.contains("accessdenied") {
            return CollaboratorError::Unauthorized(message.clone());
        }
        if lower.contains("doesn't exist") || lower.contains("not installed") {
            return CollaboratorError::NotInstalled(message.clone());
        }
    }
    err.into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn fault(message: &str) -> RpcError {
        RpcError::Fault {
            code: 200,
            message: message.to_string(),
        }
    }

    #[test]
    fn billing_module_missing_is_not_installed() {
        assert_matches!(
            translate(fault("Object tenant.billing doesn't exist")),
            CollaboratorError::NotInstalled(_)
        );
    }

    #[test]
    fn repeated_registration_is_already_exists() {
        assert_matches!(
            translate(fault("Tenant 42 is already registered for metered billing")),
            CollaboratorError::AlreadyExists(_)
        );
    }

    #[test]
    fn unique_code_violation_is_already_exists() {
        assert_matches!(
            translate(fault("duplicate key value violates unique constraint \"tenant_code_uniq\"")),
            CollaboratorError::AlreadyExists(_)
        );
    }

    #[test]
    fn transport_failures_fall_through() {
        assert_matches!(
            translate(RpcError::HttpStatus {
                status: 503,
                body: "maintenance".into()
            }),
            CollaboratorError::Unavailable(_)
        );
    }

    #[test]
    fn debug_hides_password() {
        let creds = BackOfficeCredentials {
            database: "central".into(),
            login: "provisioner".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
