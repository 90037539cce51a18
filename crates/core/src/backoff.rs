//! Retry scheduling for failed provisioning jobs.
//!
//! A failed job is retried after a delay taken from a fixed table indexed by
//! the number of attempts already made (`attempts - 1`), clamped to the last
//! entry. Once `attempts` reaches `max_attempts` the job is not rescheduled.

use std::time::Duration;

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default retry delays: 1 minute, 5 minutes, 15 minutes, 1 hour.
pub const DEFAULT_BACKOFF_SECS: [u64; 4] = [60, 300, 900, 3600];

/// Default number of attempts before a job is permanently failed.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Longest accepted single delay (7 days).
pub const MAX_BACKOFF_SECS: u64 = 7 * 24 * 3600;

// ---------------------------------------------------------------------------
// BackoffTable
// ---------------------------------------------------------------------------

/// A non-empty sequence of retry delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffTable {
    delays: Vec<Duration>,
}

impl BackoffTable {
    /// Build a table from explicit delays.
    ///
    /// The table must not be empty and no delay may exceed
    /// [`MAX_BACKOFF_SECS`].
    pub fn new(delays: Vec<Duration>) -> Result<Self, CoreError> {
        if delays.is_empty() {
            return Err(CoreError::Validation(
                "Backoff table must contain at least one delay".to_string(),
            ));
        }
        if let Some(too_long) = delays.iter().find(|d| d.as_secs() > MAX_BACKOFF_SECS) {
            return Err(CoreError::Validation(format!(
                "Backoff delay of {}s exceeds the {MAX_BACKOFF_SECS}s maximum",
                too_long.as_secs()
            )));
        }
        Ok(Self { delays })
    }

    /// Parse a comma-separated list of delays in seconds, e.g. `"60,300,900"`.
    pub fn parse_secs(csv: &str) -> Result<Self, CoreError> {
        let delays = csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| CoreError::Validation(format!("Invalid backoff delay: {s}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(delays)
    }

    /// Delay before the next run after the job has failed `attempts` times.
    ///
    /// `attempts` is the count *after* the failure was recorded, so the first
    /// failure (`attempts == 1`) uses index 0. Values past the end of the
    /// table reuse its last entry; values below 1 use the first.
    pub fn delay_for_attempt(&self, attempts: i32) -> Duration {
        let idx = usize::try_from(attempts.saturating_sub(1)).unwrap_or(0);
        self.delays[idx.min(self.delays.len() - 1)]
    }

    /// The delays in whole seconds, in table order (bound as a SQL array).
    pub fn delays_secs(&self) -> Vec<i64> {
        self.delays.iter().map(|d| d.as_secs() as i64).collect()
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    /// Always `false`: a table is never empty.
    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl Default for BackoffTable {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

/// Compute `next_run_at` after a failure.
///
/// Returns `None` when `attempts` has reached `max_attempts`: the job is then
/// permanently failed and must never be picked up again.
pub fn next_run_at(
    table: &BackoffTable,
    attempts: i32,
    max_attempts: i32,
    now: Timestamp,
) -> Option<Timestamp> {
    if attempts >= max_attempts {
        return None;
    }
    let delay_secs = table.delay_for_attempt(attempts).as_secs() as i64;
    Some(now + chrono::Duration::seconds(delay_secs))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
