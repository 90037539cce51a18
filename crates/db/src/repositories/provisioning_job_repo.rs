//! Repository for the `provisioning_jobs` table.
//!
//! Every state transition is a single conditional `UPDATE`; transitions that
//! also touch the tenant mirror run both statements in one transaction.
//! Mutual exclusion between executors relies solely on the conditional
//! update in [`ProvisioningJobRepo::try_acquire_lock`].

use std::time::Duration;

use provisioner_core::backoff::BackoffTable;
use provisioner_core::progress::ProgressData;
use provisioner_core::steps::ProvisioningStep;
use provisioner_core::tenant::provisioning_status;
use provisioner_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::provisioning_job::{
    CreateProvisioningJob, PendingSummary, ProgressUpdate, ProvisioningJob,
};
use crate::models::status::ProvisioningJobStatus;
use crate::repositories::TenantRepo;

/// Column list for `provisioning_jobs` queries.
const COLUMNS: &str = "\
    id, tenant_id, tenant_code, user_id, status_id, current_step, \
    attempts, max_attempts, next_run_at, last_error, failed_step, \
    progress_data, locked_at, locked_by, started_at, completed_at, \
    created_at, updated_at";

/// Predicate selecting jobs eligible to run now.
///
/// Binds: `$1` pending, `$2` running, `$3` failed, `$4` lock TTL in seconds.
/// A running job only qualifies once its lock is gone or stale, which is how
/// an executor that died mid-run gets its job picked up again.
const DUE_PREDICATE: &str = "\
    (status_id IN ($1, $2) OR (status_id = $3 AND next_run_at IS NOT NULL)) \
    AND (next_run_at IS NULL OR next_run_at <= NOW()) \
    AND (locked_at IS NULL OR locked_at < NOW() - make_interval(secs => $4::double precision))";

/// Canonical step names in order, bound as `text[]` for monotonic checks.
fn step_order() -> Vec<&'static str> {
    ProvisioningStep::all().map(ProvisioningStep::as_str).collect()
}

pub struct ProvisioningJobRepo;

impl ProvisioningJobRepo {
    /// Insert a pending job and reset the tenant mirror to `pending`.
    pub async fn create(
        pool: &PgPool,
        input: &CreateProvisioningJob,
    ) -> Result<ProvisioningJob, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO provisioning_jobs \
                (tenant_id, tenant_code, user_id, status_id, current_step, \
                 max_attempts, next_run_at, progress_data) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), $7) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, ProvisioningJob>(&query)
            .bind(input.tenant_id)
            .bind(&input.tenant_code)
            .bind(input.user_id)
            .bind(ProvisioningJobStatus::Pending.id())
            .bind(ProvisioningStep::INITIAL.as_str())
            .bind(input.max_attempts)
            .bind(Json(&input.seed_progress))
            .fetch_one(&mut *tx)
            .await?;

        TenantRepo::mirror_status(&mut *tx, job.tenant_id, provisioning_status::PENDING, None)
            .await?;

        tx.commit().await?;
        Ok(job)
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<ProvisioningJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM provisioning_jobs WHERE id = $1");
        sqlx::query_as::<_, ProvisioningJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Latest job for a tenant code.
    pub async fn find_by_tenant_code(
        pool: &PgPool,
        tenant_code: &str,
    ) -> Result<Option<ProvisioningJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM provisioning_jobs \
             WHERE tenant_code = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, ProvisioningJob>(&query)
            .bind(tenant_code)
            .fetch_optional(pool)
            .await
    }

    /// Try to take the execution lock.
    ///
    /// Returns `false` when another executor holds a lock younger than `ttl`.
    pub async fn try_acquire_lock(
        pool: &PgPool,
        id: DbId,
        executor_id: &str,
        ttl: Duration,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE provisioning_jobs SET locked_at = NOW(), locked_by = $2 \
             WHERE id = $1 \
               AND (locked_at IS NULL \
                    OR locked_at < NOW() - make_interval(secs => $3::double precision))",
        )
        .bind(id)
        .bind(executor_id)
        .bind(ttl.as_secs_f64())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Release the lock if `executor_id` still holds it.
    ///
    /// Returns `false` when the lock was already gone or taken over.
    pub async fn release_lock(
        pool: &PgPool,
        id: DbId,
        executor_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE provisioning_jobs SET locked_at = NULL, locked_by = NULL \
             WHERE id = $1 AND locked_by = $2",
        )
        .bind(id)
        .bind(executor_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Flag the job as running and the tenant as provisioning.
    pub async fn mark_running(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<ProvisioningJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE provisioning_jobs SET \
                status_id = $2, \
                started_at = COALESCE(started_at, NOW()) \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, ProvisioningJob>(&query)
            .bind(id)
            .bind(ProvisioningJobStatus::Running.id())
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(job) = &job {
            TenantRepo::mirror_status(
                &mut *tx,
                job.tenant_id,
                provisioning_status::PROVISIONING,
                None,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    /// Shallow-merge `patch` into `progress_data` and apply `update`.
    ///
    /// `current_step` only ever moves forward: a request to move it to an
    /// earlier step leaves the column unchanged.
    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        patch: &ProgressData,
        update: ProgressUpdate,
    ) -> Result<Option<ProvisioningJob>, sqlx::Error> {
        let query = format!(
            "UPDATE provisioning_jobs SET \
                progress_data = progress_data || $2::jsonb, \
                status_id = COALESCE($3::smallint, status_id), \
                current_step = CASE \
                    WHEN $4::text IS NULL THEN current_step \
                    WHEN array_position($5::text[], $4::text) \
                         >= array_position($5::text[], current_step) THEN $4::text \
                    ELSE current_step \
                END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProvisioningJob>(&query)
            .bind(id)
            .bind(Json(patch))
            .bind(update.status.map(ProvisioningJobStatus::id))
            .bind(update.current_step.map(ProvisioningStep::as_str))
            .bind(step_order())
            .fetch_optional(pool)
            .await
    }

    /// Record a failed run and schedule the next attempt.
    ///
    /// `attempts` grows by one (never past `max_attempts`). While attempts
    /// remain, `next_run_at` is now plus the backoff entry for the new attempt
    /// count (clamped to the last entry); otherwise it is cleared and the job
    /// is permanently failed. The tenant mirror is updated in the same
    /// transaction.
    pub async fn mark_failed(
        pool: &PgPool,
        id: DbId,
        error: &str,
        failed_step: Option<ProvisioningStep>,
        backoff: &BackoffTable,
    ) -> Result<Option<ProvisioningJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE provisioning_jobs SET \
                attempts = LEAST(attempts + 1, max_attempts), \
                status_id = $2, \
                last_error = $3, \
                failed_step = COALESCE($4, failed_step), \
                next_run_at = CASE \
                    WHEN attempts + 1 < max_attempts THEN NOW() + make_interval(secs => \
                        (($5::bigint[])[LEAST(attempts + 1, cardinality($5::bigint[]))])::double precision) \
                    ELSE NULL \
                END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, ProvisioningJob>(&query)
            .bind(id)
            .bind(ProvisioningJobStatus::Failed.id())
            .bind(error)
            .bind(failed_step.map(ProvisioningStep::as_str))
            .bind(backoff.delays_secs())
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(job) = &job {
            TenantRepo::mirror_status(
                &mut *tx,
                job.tenant_id,
                provisioning_status::FAILED,
                Some(error),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    /// Terminal success: clear retry state and the lock, tenant becomes ready.
    pub async fn mark_succeeded(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<ProvisioningJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE provisioning_jobs SET \
                status_id = $2, \
                current_step = $3, \
                completed_at = NOW(), \
                next_run_at = NULL, \
                failed_step = NULL, \
                last_error = NULL, \
                locked_at = NULL, \
                locked_by = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, ProvisioningJob>(&query)
            .bind(id)
            .bind(ProvisioningJobStatus::Succeeded.id())
            .bind(ProvisioningStep::FINAL.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(job) = &job {
            TenantRepo::mirror_status(&mut *tx, job.tenant_id, provisioning_status::READY, None)
                .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    /// The database clock, which every `NOW()` in this repository reads.
    pub async fn current_time(pool: &PgPool) -> Result<Timestamp, sqlx::Error> {
        sqlx::query_scalar("SELECT NOW()").fetch_one(pool).await
    }

    /// Jobs eligible to run now, oldest first.
    pub async fn find_due(
        pool: &PgPool,
        limit: i64,
        lock_ttl: Duration,
    ) -> Result<Vec<ProvisioningJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM provisioning_jobs \
             WHERE {DUE_PREDICATE} \
             ORDER BY created_at ASC, id ASC \
             LIMIT $5"
        );
        sqlx::query_as::<_, ProvisioningJob>(&query)
            .bind(ProvisioningJobStatus::Pending.id())
            .bind(ProvisioningJobStatus::Running.id())
            .bind(ProvisioningJobStatus::Failed.id())
            .bind(lock_ttl.as_secs_f64())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Number of due jobs and the oldest of them.
    pub async fn pending_summary(
        pool: &PgPool,
        lock_ttl: Duration,
    ) -> Result<PendingSummary, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM provisioning_jobs WHERE {DUE_PREDICATE}");
        let due_count: i64 = sqlx::query_scalar(&query)
            .bind(ProvisioningJobStatus::Pending.id())
            .bind(ProvisioningJobStatus::Running.id())
            .bind(ProvisioningJobStatus::Failed.id())
            .bind(lock_ttl.as_secs_f64())
            .fetch_one(pool)
            .await?;

        let oldest = Self::find_due(pool, 1, lock_ttl).await?.into_iter().next();
        Ok(PendingSummary { due_count, oldest })
    }
}
