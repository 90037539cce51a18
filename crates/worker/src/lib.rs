//! Batch execution of due provisioning jobs.
//!
//! [`ProvisioningWorker`] is stateless: any number of workers (the scheduled
//! binary, the API's worker endpoint) may run against the same job table.
//! Mutual exclusion is entirely the job lock taken by the orchestrator.

pub mod config;
pub mod worker;

pub use config::WorkerConfig;
pub use worker::{
    JobReport, PendingJob, ProvisioningWorker, RunOptions, RunSummary, WorkerError, WorkerStatus,
};
