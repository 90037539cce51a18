//! Tenant code rules and the tenant-side provisioning status vocabulary.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Tenant codes
// ---------------------------------------------------------------------------

/// Maximum length of a tenant code.
pub const TENANT_CODE_MAX_LEN: usize = 32;

/// Lowercase letter first, then lowercase letters, digits, `-` or `_`.
static TENANT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("valid regex"));

/// Validate a tenant code.
///
/// Codes end up in database names and registry keys, so they are restricted
/// to a conservative character set.
pub fn validate_tenant_code(code: &str) -> Result<(), CoreError> {
    if code.len() < 2 || code.len() > TENANT_CODE_MAX_LEN {
        return Err(CoreError::Validation(format!(
            "Tenant code must be between 2 and {TENANT_CODE_MAX_LEN} characters"
        )));
    }
    if !TENANT_CODE_RE.is_match(code) {
        return Err(CoreError::Validation(format!(
            "Tenant code '{code}' must start with a lowercase letter and contain only \
             lowercase letters, digits, '-' or '_'"
        )));
    }
    Ok(())
}

/// Name of the external database created for a tenant.
///
/// Hyphens are not portable in database identifiers and become underscores.
pub fn database_name(prefix: &str, code: &str) -> String {
    format!("{prefix}{}", code.replace('-', "_"))
}

// ---------------------------------------------------------------------------
// Tenant provisioning status
// ---------------------------------------------------------------------------

/// Values of `tenants.provisioning_status`, mirrored from the job.
pub mod provisioning_status {
    pub const PENDING: &str = "pending";
    pub const PROVISIONING: &str = "provisioning";
    pub const READY: &str = "ready";
    pub const FAILED: &str = "failed";
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
