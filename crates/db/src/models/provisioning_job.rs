//! Provisioning job entity and DTOs.

use provisioner_core::progress::ProgressData;
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};

use super::status::{ProvisioningJobStatus, StatusId};

/// A row from the `provisioning_jobs` table.
///
/// `FromRow` is implemented by hand because the two step columns are parsed
/// into [`ProvisioningStep`] and the JSONB progress column into a map.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningJob {
    pub id: DbId,
    pub tenant_id: DbId,
    pub tenant_code: String,
    pub user_id: Option<DbId>,
    pub status_id: StatusId,
    pub current_step: ProvisioningStep,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_run_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub failed_step: Option<ProvisioningStep>,
    pub progress_data: ProgressData,
    pub locked_at: Option<Timestamp>,
    pub locked_by: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ProvisioningJob {
    /// Typed status, `None` only if the row carries an unknown status id.
    pub fn status(&self) -> Option<ProvisioningJobStatus> {
        ProvisioningJobStatus::from_id(self.status_id)
    }

    /// Succeeded, or failed with no retry scheduled.
    pub fn is_terminal(&self) -> bool {
        match self.status() {
            Some(ProvisioningJobStatus::Succeeded) => true,
            Some(ProvisioningJobStatus::Failed) => self.next_run_at.is_none(),
            _ => false,
        }
    }

    /// Failed with a retry scheduled later than `now`.
    pub fn is_backing_off_at(&self, now: Timestamp) -> bool {
        self.status() == Some(ProvisioningJobStatus::Failed)
            && self.next_run_at.is_some_and(|at| at > now)
    }

    /// Whether some executor holds a lock no older than `ttl` at `now`.
    pub fn is_locked_at(&self, now: Timestamp, ttl: chrono::Duration) -> bool {
        match self.locked_at {
            Some(locked_at) => now.signed_duration_since(locked_at) <= ttl,
            None => false,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for ProvisioningJob {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let current_step: String = row.try_get("current_step")?;
        let failed_step: Option<String> = row.try_get("failed_step")?;
        let Json(progress_data) = row.try_get::<Json<ProgressData>, _>("progress_data")?;

        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            tenant_code: row.try_get("tenant_code")?,
            user_id: row.try_get("user_id")?,
            status_id: row.try_get("status_id")?,
            current_step: parse_step("current_step", current_step)?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            next_run_at: row.try_get("next_run_at")?,
            last_error: row.try_get("last_error")?,
            failed_step: failed_step
                .map(|s| parse_step("failed_step", s))
                .transpose()?,
            progress_data,
            locked_at: row.try_get("locked_at")?,
            locked_by: row.try_get("locked_by")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn parse_step(column: &str, value: String) -> Result<ProvisioningStep, sqlx::Error> {
    ProvisioningStep::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// DTO for enqueuing a provisioning job.
#[derive(Debug, Clone)]
pub struct CreateProvisioningJob {
    pub tenant_id: DbId,
    pub tenant_code: String,
    pub user_id: Option<DbId>,
    pub max_attempts: i32,
    /// Initial progress data, e.g. values captured by the signup form.
    pub seed_progress: ProgressData,
}

/// Fields written alongside a progress patch.
///
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressUpdate {
    pub status: Option<ProvisioningJobStatus>,
    pub current_step: Option<ProvisioningStep>,
}

/// Queue overview returned by the worker status probe.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    /// Number of jobs eligible to run right now.
    pub due_count: i64,
    /// The oldest due job, if any.
    pub oldest: Option<ProvisioningJob>,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn job(status: ProvisioningJobStatus) -> ProvisioningJob {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        ProvisioningJob {
            id: 1,
            tenant_id: 1,
            tenant_code: "acme".into(),
            user_id: None,
            status_id: status.id(),
            current_step: ProvisioningStep::Queued,
            attempts: 0,
            max_attempts: 5,
            next_run_at: None,
            last_error: None,
            failed_step: None,
            progress_data: ProgressData::new(),
            locked_at: None,
            locked_by: None,
            started_at: None,
            completed_at: None,
            created_at: t,
            updated_at: t,
        }
    }

    #[test]
    fn failed_without_retry_is_terminal() {
        let mut j = job(ProvisioningJobStatus::Failed);
        assert!(j.is_terminal());
        j.next_run_at = Some(j.created_at);
        assert!(!j.is_terminal());
        assert!(job(ProvisioningJobStatus::Succeeded).is_terminal());
        assert!(!job(ProvisioningJobStatus::Pending).is_terminal());
    }

    #[test]
    fn failed_job_backs_off_until_next_run() {
        let mut j = job(ProvisioningJobStatus::Failed);
        let now = j.created_at;
        j.next_run_at = Some(now + chrono::Duration::seconds(60));
        assert!(j.is_backing_off_at(now));
        assert!(!j.is_backing_off_at(now + chrono::Duration::seconds(60)));

        let mut pending = job(ProvisioningJobStatus::Pending);
        pending.next_run_at = Some(now + chrono::Duration::seconds(60));
        assert!(!pending.is_backing_off_at(now));
    }

    #[test]
    fn lock_expires_after_ttl() {
        let mut j = job(ProvisioningJobStatus::Running);
        let ttl = chrono::Duration::seconds(60);
        let now = j.created_at;
        assert!(!j.is_locked_at(now, ttl));

        j.locked_at = Some(now);
        assert!(j.is_locked_at(now + chrono::Duration::seconds(30), ttl));
        assert!(!j.is_locked_at(now + chrono::Duration::seconds(61), ttl));
    }
}
