//! Repository for the `jobs` table.
//!
//! Uses `JobStatus` from `models::status` for every status literal. Each
//! transition is a single conditional `UPDATE`, so the status column is the
//! only coordination point between dispatchers.

use cadence_core::scheduling::STUCK_MULTIPLIER;
use cadence_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::job::{Job, JobCompletion, NewJob};
use crate::models::status::{JobStatus, StatusId};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, priority, job_type, title, job_config, provider, status_id, \
    schedule_after, deadline, estimated_duration_secs, \
    started_at, completed_at, actual_duration_secs, \
    result_data, cost, output_urls, error_message, error_details, \
    source_recommendation_id, created_at, updated_at";

/// Provides queue operations for production jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job with `status = queued`.
    ///
    /// `schedule_after` defaults to `NOW()` when not provided.
    pub async fn enqueue(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                 (priority, job_type, title, job_config, provider, status_id, \
                  schedule_after, deadline, estimated_duration_secs, source_recommendation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, NOW()), $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.priority.as_i16())
            .bind(&input.job_type)
            .bind(&input.title)
            .bind(&input.job_config)
            .bind(&input.provider)
            .bind(JobStatus::Queued.id())
            .bind(input.schedule_after)
            .bind(input.deadline)
            .bind(input.estimated_duration_secs)
            .bind(input.source_recommendation_id)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the next eligible queued job for a provider and mark
    /// it processing with `started_at = now`.
    ///
    /// Claim and mark are one statement. `FOR UPDATE SKIP LOCKED` makes a
    /// concurrent claimant skip the row instead of waiting for it, so a
    /// losing caller simply gets `None`.
    pub async fn claim_next(
        pool: &PgPool,
        provider: &str,
        now: Timestamp,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $1, started_at = $2, updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = $3 AND provider = $4 AND schedule_after <= $2 \
                 ORDER BY priority ASC, deadline ASC NULLS LAST, created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Processing.id())
            .bind(now)
            .bind(JobStatus::Queued.id())
            .bind(provider)
            .fetch_optional(pool)
            .await
    }

    /// Mark a processing job as completed with its result.
    ///
    /// Returns `None` when the job does not exist or is not processing.
    pub async fn complete(
        pool: &PgPool,
        job_id: DbId,
        completion: &JobCompletion,
        now: Timestamp,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, result_data = $3, cost = $4, output_urls = $5, \
                 completed_at = $6::timestamptz, \
                 actual_duration_secs = EXTRACT(EPOCH FROM $6::timestamptz - started_at)::INTEGER, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $7 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Completed.id())
            .bind(&completion.result_data)
            .bind(completion.cost)
            .bind(completion.output_urls_json())
            .bind(now)
            .bind(JobStatus::Processing.id())
            .fetch_optional(pool)
            .await
    }

    /// Mark a processing job as failed with an error message and details.
    ///
    /// No automatic retry is performed; failed is terminal. Returns `None`
    /// when the job does not exist or is not processing.
    pub async fn fail(
        pool: &PgPool,
        job_id: DbId,
        error: &str,
        details: Option<&serde_json::Value>,
        now: Timestamp,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, error_details = $4, \
                 completed_at = $5::timestamptz, \
                 actual_duration_secs = EXTRACT(EPOCH FROM \
                     COALESCE($5::timestamptz - started_at, INTERVAL '0'))::INTEGER, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $6 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Failed.id())
            .bind(error)
            .bind(details)
            .bind(now)
            .bind(JobStatus::Processing.id())
            .fetch_optional(pool)
            .await
    }

    /// Processing jobs that have run longer than twice their estimate.
    pub async fn list_stuck(pool: &PgPool, now: Timestamp) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id = $1 \
               AND started_at IS NOT NULL \
               AND $2 - started_at > (estimated_duration_secs * $3) * INTERVAL '1 second' \
             ORDER BY started_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Processing.id())
            .bind(now)
            .bind(STUCK_MULTIPLIER)
            .fetch_all(pool)
            .await
    }

    /// Number of jobs currently processing for a provider.
    pub async fn count_processing(pool: &PgPool, provider: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE provider = $1 AND status_id = $2",
        )
        .bind(provider)
        .bind(JobStatus::Processing.id())
        .fetch_one(pool)
        .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Job counts grouped by status id.
    pub async fn counts_by_status(pool: &PgPool) -> Result<Vec<(StatusId, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (StatusId, i64)>(
            "SELECT status_id, COUNT(*) FROM jobs GROUP BY status_id",
        )
        .fetch_all(pool)
        .await
    }

    /// Job counts grouped by a text column (`job_type` or `provider`).
    pub async fn counts_by_column(
        pool: &PgPool,
        column: GroupColumn,
    ) -> Result<Vec<(String, i64)>, sqlx::Error> {
        let column = column.as_sql();
        let query = format!("SELECT {column}, COUNT(*) FROM jobs GROUP BY {column}");
        sqlx::query_as::<_, (String, i64)>(&query)
            .fetch_all(pool)
            .await
    }
}

/// Text columns that status counts can be grouped by.
#[derive(Debug, Clone, Copy)]
pub enum GroupColumn {
    JobType,
    Provider,
}

impl GroupColumn {
    fn as_sql(self) -> &'static str {
        match self {
            Self::JobType => "job_type",
            Self::Provider => "provider",
        }
    }
}
