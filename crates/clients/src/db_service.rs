//! Tenant database creation through the database manager service.

use async_trait::async_trait;
use provisioner_pipeline::collaborators::{CollaboratorError, DatabaseProvisioner};
use serde_json::{json, Value};

use crate::rpc::{JsonRpcClient, RpcError};

/// Copies the template database with the server's `db.duplicate_database`.
pub struct RpcDatabaseProvisioner {
    rpc: JsonRpcClient,
    master_password: String,
}

impl RpcDatabaseProvisioner {
    pub fn new(rpc: JsonRpcClient, master_password: String) -> Self {
        Self {
            rpc,
            master_password,
        }
    }
}

#[async_trait]
impl DatabaseProvisioner for RpcDatabaseProvisioner {
    async fn copy_template(&self, template: &str, target: &str) -> Result<(), CollaboratorError> {
        self.rpc
            .service::<Value>(
                "db",
                "duplicate_database",
                json!([self.master_password, template, target]),
            )
            .await
            .map_err(translate)?;

        tracing::info!(template, target, "Tenant database copied from template");
        Ok(())
    }
}

/// Map a database-service failure to a collaborator error kind.
fn translate(err: RpcError) -> CollaboratorError {
    if let RpcError::Fault { message, .. } = &err {
        let lower = message.to_lowercase();
        if lower.contains("already exists") {
            return CollaboratorError::AlreadyExists(message.clone());
        }
        if lower.contains("access denied") || lower.contains("master password") {
            return CollaboratorError::Unauthorized(message.clone());
        }
        if lower.contains("does not exist") {
            return CollaboratorError::MissingInput(message.clone());
        }
        if lower.contains("being accessed by other users") {
            return CollaboratorError::Unavailable(message.clone());
        }
    }
    err.into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
