//! Engine configuration and shared environment helpers.

use std::str::FromStr;
use std::time::Duration;

use provisioner_core::backoff::{BackoffTable, DEFAULT_MAX_ATTEMPTS};

/// Configuration error raised while reading the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Read `var`, falling back to `default` when unset.
pub fn env_or<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Read a required, non-empty variable.
pub fn env_required(var: &'static str) -> Result<String, ConfigError> {
    env_optional(var).ok_or(ConfigError::Missing(var))
}

/// Read an optional variable; empty values count as unset.
pub fn env_optional(var: &'static str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a boolean flag (`1`, `true`, `yes`, `on`; case-insensitive).
pub fn env_flag(var: &'static str) -> bool {
    env_optional(var)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Default lock TTL: 15 minutes.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 900;

/// Default per-call timeout for collaborators.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Tuning and naming knobs for the provisioning engine.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempts before a job is permanently failed.
    pub max_attempts: i32,
    /// Age after which an unreleased lock may be taken over.
    pub lock_ttl: Duration,
    /// Retry delays indexed by attempt count.
    pub backoff: BackoffTable,
    /// Upper bound for any single collaborator call.
    pub call_timeout: Duration,
    /// Database copied for every new tenant.
    pub template_database: String,
    /// Prefix of tenant database names.
    pub database_prefix: String,
    /// Administrator login inherited from the template.
    pub admin_login: String,
    /// Administrator password inherited from the template; rotated by the
    /// `configure_admin` step.
    pub template_admin_password: String,
    /// Label of the API key minted on each tenant database.
    pub api_key_name: String,
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                                | Default            |
    /// |----------------------------------------|--------------------|
    /// | `PROVISIONING_MAX_ATTEMPTS`            | `5`                |
    /// | `PROVISIONING_LOCK_TTL_SECS`           | `900`              |
    /// | `PROVISIONING_BACKOFF_SECS`            | `60,300,900,3600`  |
    /// | `PROVISIONING_CALL_TIMEOUT_SECS`       | `60`               |
    /// | `PROVISIONING_TEMPLATE_DATABASE`       | `tenant_template`  |
    /// | `PROVISIONING_DATABASE_PREFIX`         | `tenant_`          |
    /// | `PROVISIONING_ADMIN_LOGIN`             | `admin`            |
    /// | `PROVISIONING_TEMPLATE_ADMIN_PASSWORD` | required           |
    /// | `PROVISIONING_API_KEY_NAME`            | `provisioner`      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_attempts: i32 = env_or("PROVISIONING_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts < 1 {
            return Err(ConfigError::Invalid {
                var: "PROVISIONING_MAX_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }

        let backoff = match env_optional("PROVISIONING_BACKOFF_SECS") {
            Some(csv) => BackoffTable::parse_secs(&csv).map_err(|e| ConfigError::Invalid {
                var: "PROVISIONING_BACKOFF_SECS",
                reason: e.to_string(),
            })?,
            None => BackoffTable::default(),
        };

        Ok(Self {
            max_attempts,
            lock_ttl: Duration::from_secs(env_or(
                "PROVISIONING_LOCK_TTL_SECS",
                DEFAULT_LOCK_TTL_SECS,
            )?),
            backoff,
            call_timeout: Duration::from_secs(env_or(
                "PROVISIONING_CALL_TIMEOUT_SECS",
                DEFAULT_CALL_TIMEOUT_SECS,
            )?),
            template_database: env_or(
                "PROVISIONING_TEMPLATE_DATABASE",
                "tenant_template".to_string(),
            )?,
            database_prefix: env_or("PROVISIONING_DATABASE_PREFIX", "tenant_".to_string())?,
            admin_login: env_or("PROVISIONING_ADMIN_LOGIN", "admin".to_string())?,
            template_admin_password: env_required("PROVISIONING_TEMPLATE_ADMIN_PASSWORD")?,
            api_key_name: env_or("PROVISIONING_API_KEY_NAME", "provisioner".to_string())?,
        })
    }
}

impl Default for PipelineConfig {
    /// Defaults for tests and local development. The template password is
    /// a placeholder.
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            backoff: BackoffTable::default(),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            template_database: "tenant_template".into(),
            database_prefix: "tenant_".into(),
            admin_login: "admin".into(),
            template_admin_password: "admin".into(),
            api_key_name: "provisioner".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_when_unset() {
        let v: u64 = env_or("PROVISIONER_TEST_CONFIG_UNSET", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn env_or_reports_invalid_values() {
        std::env::set_var("PROVISIONER_TEST_CONFIG_BAD_NUMBER", "soon");
        let err = env_or::<u64>("PROVISIONER_TEST_CONFIG_BAD_NUMBER", 1).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "PROVISIONER_TEST_CONFIG_BAD_NUMBER", .. }
        ));
    }

    #[test]
    fn env_flag_accepts_common_spellings() {
        std::env::set_var("PROVISIONER_TEST_CONFIG_FLAG_ON", "Yes");
        std::env::set_var("PROVISIONER_TEST_CONFIG_FLAG_OFF", "0");
        assert!(env_flag("PROVISIONER_TEST_CONFIG_FLAG_ON"));
        assert!(!env_flag("PROVISIONER_TEST_CONFIG_FLAG_OFF"));
        assert!(!env_flag("PROVISIONER_TEST_CONFIG_FLAG_UNSET"));
    }

    #[test]
    fn missing_required_variable_is_an_error() {
        assert!(matches!(
            env_required("PROVISIONER_TEST_CONFIG_REQUIRED_UNSET"),
            Err(ConfigError::Missing(_))
        ));
    }
}
