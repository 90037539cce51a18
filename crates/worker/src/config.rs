use std::time::Duration;

use provisioner_pipeline::config::{env_flag, env_or, ConfigError};

use crate::worker::RunOptions;

/// Default number of jobs fetched per batch.
pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Default time budget of one batch, leaving headroom under a one-minute
/// scheduler slot.
pub const DEFAULT_MAX_DURATION_MS: u64 = 55_000;

/// Default pause after a batch that found nothing to do.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: i64,
    pub max_duration: Duration,
    pub poll_interval: Duration,
    pub stop_on_error: bool,
    /// Run a single batch and exit instead of polling.
    pub run_once: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `WORKER_BATCH_SIZE`       | `10`    |
    /// | `WORKER_MAX_DURATION_MS`  | `55000` |
    /// | `WORKER_POLL_INTERVAL_MS` | `5000`  |
    /// | `WORKER_STOP_ON_ERROR`    | `false` |
    /// | `WORKER_RUN_ONCE`         | `false` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let batch_size: i64 = env_or("WORKER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size < 1 {
            return Err(ConfigError::Invalid {
                var: "WORKER_BATCH_SIZE",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            batch_size,
            max_duration: Duration::from_millis(env_or(
                "WORKER_MAX_DURATION_MS",
                DEFAULT_MAX_DURATION_MS,
            )?),
            poll_interval: Duration::from_millis(env_or(
                "WORKER_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            stop_on_error: env_flag("WORKER_STOP_ON_ERROR"),
            run_once: env_flag("WORKER_RUN_ONCE"),
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            batch_size: self.batch_size,
            max_duration: self.max_duration,
            stop_on_error: self.stop_on_error,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
