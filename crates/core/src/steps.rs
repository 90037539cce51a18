//! The canonical, totally ordered provisioning step sequence.
//!
//! [`ProvisioningStep`] is both the persisted `current_step` / `failed_step`
//! value and the key of the step-handler registry. The declaration order of
//! the variants *is* the pipeline order: the derived `Ord` is relied upon
//! when checking that a job never moves backwards.
//!
//! Two variants are markers rather than executable steps:
//! [`ProvisioningStep::Queued`] is stored on a freshly created job and
//! [`ProvisioningStep::Completed`] on a job that finished the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One named stage of the tenant provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStep {
    /// Initial marker: the job exists but no step has started.
    Queued,
    /// Validate the tenant and record its display name.
    Init,
    /// Copy the template database into the tenant's own database.
    CopyDatabase,
    /// Open an administrative session on the new tenant database.
    Authenticate,
    /// Rotate the administrator credentials inherited from the template.
    ConfigureAdmin,
    /// Mint an API key on the tenant database (optional capability).
    ConfigureApiKey,
    /// Create or update the tenant record in the central back office.
    UpsertTenant,
    /// Register the tenant for metered billing (optional capability).
    RegisterBilling,
    /// Create or update the requesting user in the central back office.
    UpsertUser,
    /// Publish tenant metadata to the registry. Non-fatal.
    PublishMetadata,
    /// Activate the local tenant record.
    Finalize,
    /// Email the generated credentials to the requesting user. Non-fatal.
    Notify,
    /// Final marker: every step has completed.
    Completed,
}

impl ProvisioningStep {
    /// Every executable step, in execution order. Each appears exactly once.
    pub const PIPELINE: [ProvisioningStep; 11] = [
        Self::Init,
        Self::CopyDatabase,
        Self::Authenticate,
        Self::ConfigureAdmin,
        Self::ConfigureApiKey,
        Self::UpsertTenant,
        Self::RegisterBilling,
        Self::UpsertUser,
        Self::PublishMetadata,
        Self::Finalize,
        Self::Notify,
    ];

    /// Marker stored on a job that has not started yet.
    pub const INITIAL: ProvisioningStep = Self::Queued;

    /// Marker stored on a job that completed the pipeline.
    pub const FINAL: ProvisioningStep = Self::Completed;

    /// Stable snake_case name, used for persistence and logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Init => "init",
            Self::CopyDatabase => "copy_database",
            Self::Authenticate => "authenticate",
            Self::ConfigureAdmin => "configure_admin",
            Self::ConfigureApiKey => "configure_api_key",
            Self::UpsertTenant => "upsert_tenant",
            Self::RegisterBilling => "register_billing",
            Self::UpsertUser => "upsert_user",
            Self::PublishMetadata => "publish_metadata",
            Self::Finalize => "finalize",
            Self::Notify => "notify",
            Self::Completed => "completed",
        }
    }

    /// Whether this is a real pipeline step (not one of the two markers).
    pub fn is_executable(self) -> bool {
        !matches!(self, Self::Queued | Self::Completed)
    }

    /// Whether a failure of this step fails the whole job.
    ///
    /// Publishing metadata and sending the credentials email are auxiliary:
    /// their failure is logged and the pipeline continues.
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::PublishMetadata | Self::Notify)
    }

    /// Zero-based position inside [`Self::PIPELINE`], `None` for markers.
    pub fn position(self) -> Option<usize> {
        Self::PIPELINE.iter().position(|s| *s == self)
    }

    /// The steps still to run when execution resumes at `self`.
    ///
    /// `Queued` yields the whole pipeline, `Completed` yields nothing.
    pub fn remaining(self) -> &'static [ProvisioningStep] {
        match self {
            Self::Queued => &Self::PIPELINE,
            Self::Completed => &[],
            step => match step.position() {
                Some(idx) => &Self::PIPELINE[idx..],
                None => &[],
            },
        }
    }

    /// Every variant, markers included, in canonical order.
    pub fn all() -> impl Iterator<Item = ProvisioningStep> {
        std::iter::once(Self::INITIAL)
            .chain(Self::PIPELINE)
            .chain(std::iter::once(Self::FINAL))
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisioningStep {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown provisioning step: {s}")))
    }
}

impl TryFrom<String> for ProvisioningStep {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
