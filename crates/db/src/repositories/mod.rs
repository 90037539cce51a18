//! Repository layer: one zero-sized struct per table.

pub mod provisioning_job_repo;
pub mod tenant_repo;
pub mod user_repo;

pub use provisioning_job_repo::ProvisioningJobRepo;
pub use tenant_repo::TenantRepo;
pub use user_repo::UserRepo;
