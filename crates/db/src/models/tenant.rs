//! Tenant entity and DTOs.

use provisioner_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `tenants` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Tenant {
    pub id: DbId,
    pub code: String,
    pub name: String,
    pub provisioning_status: String,
    pub provisioning_error: Option<String>,
    pub database_name: Option<String>,
    pub activated_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a tenant ahead of provisioning.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTenant {
    pub code: String,
    pub name: String,
}
