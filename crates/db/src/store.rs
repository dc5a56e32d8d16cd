//! The [`JobStore`] trait and its PostgreSQL implementation.
//!
//! The store is the single source of truth for job state. Capacity counts
//! and claim exclusivity are derived from it, never from dispatcher memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cadence_core::types::{DbId, Timestamp};
use serde::Serialize;

use crate::models::job::{Job, JobCompletion, NewJob};
use crate::models::status::JobStatus;
use crate::repositories::{GroupColumn, JobRepo};
use crate::DbPool;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors returned by [`JobStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying database call failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(DbId),

    /// A `complete`/`fail` was attempted on a job that is not processing.
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: DbId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Resolve a guarded update that matched no row into the right error.
///
/// `current` is the job as re-read after the update missed.
pub(crate) fn missed_transition(job_id: DbId, current: Option<&Job>, to: JobStatus) -> StoreError {
    match current.and_then(Job::status) {
        Some(from) => {
            tracing::debug!(job_id, from = %from, to = %to, "Guarded transition matched no processing job");
            StoreError::InvalidTransition { job_id, from, to }
        }
        None => {
            tracing::debug!(job_id, to = %to, "Transition target job not found");
            StoreError::NotFound(job_id)
        }
    }
}

// ---------------------------------------------------------------------------
// Status counts
// ---------------------------------------------------------------------------

/// Job counts grouped three ways, for dashboards and the status query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Keyed by status name (`queued`, `processing`, ...).
    pub by_status: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
    pub by_provider: BTreeMap<String, i64>,
}

// ---------------------------------------------------------------------------
// JobStore
// ---------------------------------------------------------------------------

/// Durable job queue with atomic status transitions.
///
/// Implementations must guarantee that [`claim_next`](JobStore::claim_next)
/// hands any given job to at most one caller, even across processes, and
/// that `complete`/`fail` only succeed on a job that is processing.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job with `status = queued`.
    async fn enqueue(&self, job: &NewJob) -> Result<Job, StoreError>;

    /// Claim the next eligible job for `provider` and mark it processing.
    ///
    /// Eligible means queued with `schedule_after <= now`. Returns `None`
    /// when nothing is eligible or another claimant won the race.
    async fn claim_next(&self, provider: &str, now: Timestamp) -> Result<Option<Job>, StoreError>;

    async fn complete(
        &self,
        job_id: DbId,
        completion: &JobCompletion,
        now: Timestamp,
    ) -> Result<Job, StoreError>;

    async fn fail(
        &self,
        job_id: DbId,
        error_message: &str,
        error_details: Option<&serde_json::Value>,
        now: Timestamp,
    ) -> Result<Job, StoreError>;

    /// Processing jobs where `now - started_at > 2 * estimated_duration`.
    async fn list_stuck(&self, now: Timestamp) -> Result<Vec<Job>, StoreError>;

    /// Number of processing jobs for a provider.
    async fn count_processing(&self, provider: &str) -> Result<i64, StoreError>;

    async fn find_by_id(&self, job_id: DbId) -> Result<Option<Job>, StoreError>;

    async fn status_counts(&self) -> Result<StatusCounts, StoreError>;
}

// ---------------------------------------------------------------------------
// PgJobStore
// ---------------------------------------------------------------------------

/// [`JobStore`] backed by the PostgreSQL `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: &NewJob) -> Result<Job, StoreError> {
        Ok(JobRepo::enqueue(&self.pool, job).await?)
    }

    async fn claim_next(&self, provider: &str, now: Timestamp) -> Result<Option<Job>, StoreError> {
        let claimed = JobRepo::claim_next(&self.pool, provider, now).await?;
        if let Some(job) = &claimed {
            tracing::debug!(job_id = job.id, provider, "Claimed job row");
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        job_id: DbId,
        completion: &JobCompletion,
        now: Timestamp,
    ) -> Result<Job, StoreError> {
        match JobRepo::complete(&self.pool, job_id, completion, now).await? {
            Some(job) => Ok(job),
            None => {
                let current = JobRepo::find_by_id(&self.pool, job_id).await?;
                Err(missed_transition(job_id, current.as_ref(), JobStatus::Completed))
            }
        }
    }

    async fn fail(
        &self,
        job_id: DbId,
        error_message: &str,
        error_details: Option<&serde_json::Value>,
        now: Timestamp,
    ) -> Result<Job, StoreError> {
        match JobRepo::fail(&self.pool, job_id, error_message, error_details, now).await? {
            Some(job) => Ok(job),
            None => {
                let current = JobRepo::find_by_id(&self.pool, job_id).await?;
                Err(missed_transition(job_id, current.as_ref(), JobStatus::Failed))
            }
        }
    }

    async fn list_stuck(&self, now: Timestamp) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_stuck(&self.pool, now).await?)
    }

    async fn count_processing(&self, provider: &str) -> Result<i64, StoreError> {
        Ok(JobRepo::count_processing(&self.pool, provider).await?)
    }

    async fn find_by_id(&self, job_id: DbId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, job_id).await?)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let by_status = JobRepo::counts_by_status(&self.pool)
            .await?
            .into_iter()
            .map(|(status_id, count)| {
                let name = JobStatus::from_id(status_id).map_or("unknown", JobStatus::name);
                (name.to_string(), count)
            })
            .collect();
        let by_type = JobRepo::counts_by_column(&self.pool, GroupColumn::JobType)
            .await?
            .into_iter()
            .collect();
        let by_provider = JobRepo::counts_by_column(&self.pool, GroupColumn::Provider)
            .await?
            .into_iter()
            .collect();

        Ok(StatusCounts {
            by_status,
            by_type,
            by_provider,
        })
    }
}
