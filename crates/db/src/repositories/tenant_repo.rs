//! Repository for the `tenants` table.
//!
//! Tenants belong to the surrounding application. The provisioner only
//! writes the mirror columns: `provisioning_status`, `provisioning_error`,
//! `database_name` and `activated_at`.

use provisioner_core::tenant::provisioning_status;
use provisioner_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::tenant::{CreateTenant, Tenant};

/// Column list for `tenants` queries.
const COLUMNS: &str = "\
    id, code, name, provisioning_status, provisioning_error, \
    database_name, activated_at, created_at, updated_at";

pub struct TenantRepo;

impl TenantRepo {
    pub async fn create(pool: &PgPool, input: &CreateTenant) -> Result<Tenant, sqlx::Error> {
        let query = format!(
            "INSERT INTO tenants (code, name) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Tenant>(&query)
            .bind(&input.code)
            .bind(&input.name)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Tenant>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tenants WHERE id = $1");
        sqlx::query_as::<_, Tenant>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Tenant>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tenants WHERE code = $1");
        sqlx::query_as::<_, Tenant>(&query)
            .bind(code)
            .fetch_optional(pool)
            .await
    }

    /// Mark the tenant ready and record its database. Idempotent.
    pub async fn activate(
        pool: &PgPool,
        id: DbId,
        database_name: &str,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        let query = format!(
            "UPDATE tenants SET \
                database_name = $2, \
                activated_at = COALESCE(activated_at, NOW()), \
                provisioning_status = $3, \
                provisioning_error = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Tenant>(&query)
            .bind(id)
            .bind(database_name)
            .bind(provisioning_status::READY)
            .fetch_optional(pool)
            .await
    }

    /// Mirror a job transition onto the tenant.
    ///
    /// Takes a connection so callers can run it inside the transaction that
    /// updates the job row.
    pub async fn mirror_status(
        conn: &mut PgConnection,
        id: DbId,
        status: &str,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tenants SET provisioning_status = $2, provisioning_error = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(conn)
        .await?;
        Ok(())
    }
}
