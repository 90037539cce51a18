//! Administrative calls against a tenant's own back-office database.

use async_trait::async_trait;
use provisioner_pipeline::collaborators::{CollaboratorError, Session, TenantInstance};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::rpc::{JsonRpcClient, RpcError};

const USERS_MODEL: &str = "res.users";
const API_KEYS_MODEL: &str = "res.users.apikeys";

#[derive(Debug, Deserialize)]
struct SessionInfo {
    uid: i64,
    session_token: String,
}

/// [`TenantInstance`] over the tenant server's JSON-RPC endpoint.
///
/// One endpoint serves every tenant database; the database is selected per
/// call.
pub struct RpcTenantInstance {
    rpc: JsonRpcClient,
}

impl RpcTenantInstance {
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self { rpc }
    }

    /// `object.execute_kw` as the session's user.
    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        session: &Session,
        model: &str,
        method: &str,
        args: Value,
    ) -> Result<T, CollaboratorError> {
        self.rpc
            .service(
                "object",
                "execute_kw",
                json!([
                    session.database,
                    session.uid,
                    session.token,
                    model,
                    method,
                    args
                ]),
            )
            .await
            .map_err(translate)
    }
}

#[async_trait]
impl TenantInstance for RpcTenantInstance {
    async fn authenticate(
        &self,
        database: &str,
        login: &str,
        password: &str,
    ) -> Result<Session, CollaboratorError> {
        let result: Value = self
            .rpc
            .service(
                "common",
                "authenticate_session",
                json!([database, login, password]),
            )
            .await
            .map_err(translate)?;

        // The server answers `false` rather than faulting on bad credentials.
        if matches!(result, Value::Bool(false) | Value::Null) {
            return Err(CollaboratorError::Unauthorized(format!(
                "login '{login}' rejected by database '{database}'"
            )));
        }
        let info: SessionInfo = serde_json::from_value(result)
            .map_err(|e| CollaboratorError::Rejected(format!("unexpected session payload: {e}")))?;

        Ok(Session {
            database: database.to_string(),
            uid: info.uid,
            token: info.session_token,
        })
    }

    async fn set_admin_password(
        &self,
        session: &Session,
        login: &str,
        new_password: &str,
    ) -> Result<(), CollaboratorError> {
        let ids: Vec<i64> = self
            .execute(
                session,
                USERS_MODEL,
                "search",
                json!([[["login", "=", login]]]),
            )
            .await?;
        if ids.is_empty() {
            return Err(CollaboratorError::MissingInput(format!(
                "no user with login '{login}' in database '{}'",
                session.database
            )));
        }

        let _: Value = self
            .execute(
                session,
                USERS_MODEL,
                "write",
                json!([ids, { "password": new_password }]),
            )
            .await?;
        Ok(())
    }

    async fn create_api_key(&self, session: &Session, name: &str) -> Result<String, CollaboratorError> {
        self.execute(session, API_KEYS_MODEL, "create_key", json!([name]))
            .await
    }
}

/// Map a tenant-server failure to a collaborator error kind.
fn translate(err: RpcError) -> CollaboratorError {
    if let RpcError::Fault { message, .. } = &err {
        let lower = message.to_lowercase();
        if lower.contains("already exists") || lower.contains("duplicate key") {
            return CollaboratorError::AlreadyExists(message.clone());
        }
        if lower.contains("access denied")
            || lower.contains("accessdenied")
            || lower.contains("session expired")
        {
            return CollaboratorError::Unauthorized(message.clone());
        }
        // Unknown model or method: the optional module is not installed.
        if lower.contains("doesn't exist")
            || lower.contains("does not exist")
            || lower.contains("has no attribute")
            || lower.contains("not installed")
        {
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
    fn unknown_model_is_not_installed() {
        assert_matches!(
            translate(fault("Object res.users.apikeys doesn't exist")),
            CollaboratorError::NotInstalled(_)
        );
        assert_matches!(
            translate(fault("'res.users' object has no attribute 'create_key'")),
            CollaboratorError::NotInstalled(_)
        );
    }

    #[test]
    fn access_denied_is_unauthorized() {
        assert_matches!(
            translate(fault("AccessDenied: wrong login/password")),
            CollaboratorError::Unauthorized(_)
        );
        assert_matches!(
            translate(fault("Session expired")),
            CollaboratorError::Unauthorized(_)
        );
    }

    #[test]
    fn duplicates_are_already_exists() {
        assert_matches!(
            translate(fault("duplicate key value violates unique constraint")),
            CollaboratorError::AlreadyExists(_)
        );
    }

    #[test]
    fn validation_faults_are_rejected() {
        assert_matches!(
            translate(fault("The password is too short")),
            CollaboratorError::Rejected(_)
        );
    }
}
