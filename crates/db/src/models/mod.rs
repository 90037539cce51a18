//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, plus the DTOs used to create or patch it.

pub mod provisioning_job;
pub mod status;
pub mod tenant;
pub mod user;
