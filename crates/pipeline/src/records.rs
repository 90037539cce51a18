//! [`TenantRecords`] over the local `tenants` / `users` tables.

use async_trait::async_trait;
use provisioner_core::types::DbId;
use provisioner_db::repositories::{TenantRepo, UserRepo};
use provisioner_db::DbPool;

use crate::collaborators::{CollaboratorError, TenantProfile, TenantRecords, UserProfile};

#[derive(Clone)]
pub struct PgTenantRecords {
    pool: DbPool,
}

impl PgTenantRecords {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: sqlx::Error) -> CollaboratorError {
    CollaboratorError::Unavailable(format!("local database: {e}"))
}

#[async_trait]
impl TenantRecords for PgTenantRecords {
    async fn tenant_profile(
        &self,
        tenant_id: DbId,
    ) -> Result<Option<TenantProfile>, CollaboratorError> {
        let tenant = TenantRepo::find_by_id(&self.pool, tenant_id)
            .await
            .map_err(unavailable)?;
        Ok(tenant.map(|t| TenantProfile {
            id: t.id,
            code: t.code,
            name: t.name,
            database_name: t.database_name,
        }))
    }

    async fn user_profile(&self, user_id: DbId) -> Result<Option<UserProfile>, CollaboratorError> {
        let user = UserRepo::find_by_id(&self.pool, user_id)
            .await
            .map_err(unavailable)?;
        Ok(user.map(|u| UserProfile {
            id: u.id,
            email: u.email,
            full_name: u.full_name,
        }))
    }

    async fn activate(
        &self,
        tenant_id: DbId,
        database_name: &str,
    ) -> Result<(), CollaboratorError> {
        TenantRepo::activate(&self.pool, tenant_id, database_name)
            .await
            .map_err(unavailable)?
            .map(|_| ())
            .ok_or_else(|| CollaboratorError::MissingInput(format!("tenant {tenant_id} not found")))
    }
}
