use provisioner_pipeline::config::{env_flag, env_optional, env_or, ConfigError};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Start the first attempt of a job right after creating it.
    pub execute_on_create: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `HOST`                           | `0.0.0.0`               |
    /// | `PORT`                           | `3000`                  |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                    |
    /// | `PROVISIONING_EXECUTE_ON_CREATE` | `true`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or("HOST", "0.0.0.0".to_string())?,
            port: env_or("PORT", 3000)?,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30)?,
            execute_on_create: env_optional("PROVISIONING_EXECUTE_ON_CREATE").is_none()
                || env_flag("PROVISIONING_EXECUTE_ON_CREATE"),
        })
    }
}
