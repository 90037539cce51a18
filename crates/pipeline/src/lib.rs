//! Crash-safe tenant provisioning engine.
//!
//! The [`orchestrator::Orchestrator`] drives one job through the fixed
//! [`ProvisioningStep`](provisioner_core::steps::ProvisioningStep) sequence,
//! persisting progress through a [`store::JobStore`] and performing side
//! effects through the step runners in [`runners`], which only ever talk to
//! the outside world via the traits in [`collaborators`].

pub mod collaborators;
pub mod config;
pub mod context;
pub mod orchestrator;
pub mod records;
pub mod registry;
pub mod runners;
pub mod step;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
