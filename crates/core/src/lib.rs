//! Domain vocabulary shared by every provisioner crate.
//!
//! Nothing in here performs I/O: the step order, the retry backoff table,
//! progress-data merging, secret redaction and tenant-code rules are all
//! pure functions so the repository layer, the pipeline engine and the
//! HTTP surface agree on them.

pub mod backoff;
pub mod credentials;
pub mod error;
pub mod progress;
pub mod redact;
pub mod steps;
pub mod tenant;
pub mod types;
