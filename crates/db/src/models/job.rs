//! Job entity model and DTOs for the production queue.

use std::collections::BTreeMap;

use cadence_core::scheduling::{self, ClaimKey, Priority};
use cadence_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub priority: i16,
    pub job_type: String,
    pub title: String,
    /// Opaque payload interpreted only by the matching executor.
    pub job_config: serde_json::Value,
    /// Capacity pool this job consumes.
    pub provider: String,
    pub status_id: StatusId,
    pub schedule_after: Timestamp,
    /// Tie-breaker only; jobs are never cancelled for missing it.
    pub deadline: Option<Timestamp>,
    pub estimated_duration_secs: i32,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub actual_duration_secs: Option<i32>,
    pub result_data: Option<serde_json::Value>,
    pub cost: Option<f64>,
    pub output_urls: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    /// Weak back-reference to the originating recommendation.
    pub source_recommendation_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Typed status, or `None` for an id missing from the lookup table.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    /// Position of this job in its provider's claim order.
    pub fn claim_key(&self) -> ClaimKey {
        ClaimKey {
            priority: self.priority,
            deadline: self.deadline,
            created_at: self.created_at,
            id: self.id,
        }
    }

    /// Whether this job is processing and has run past its stuck threshold.
    pub fn is_stuck(&self, now: Timestamp) -> bool {
        match (self.status(), self.started_at) {
            (Some(JobStatus::Processing), Some(started_at)) => {
                scheduling::is_stuck(started_at, self.estimated_duration_secs, now)
            }
            _ => false,
        }
    }

    /// Seconds elapsed since the job started, if it has.
    pub fn elapsed_secs(&self, now: Timestamp) -> Option<i64> {
        self.started_at.map(|started| (now - started).num_seconds())
    }
}

/// DTO for enqueuing a new job.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewJob {
    #[serde(default)]
    pub priority: Priority,
    #[validate(length(min = 1, max = 128))]
    pub job_type: String,
    #[validate(length(min = 1, max = 500))]
    pub title: String,
    #[serde(default = "empty_object")]
    pub job_config: serde_json::Value,
    #[validate(range(min = 1))]
    pub estimated_duration_secs: i32,
    #[validate(length(min = 1, max = 64))]
    pub provider: String,
    /// Earliest eligible start. Defaults to the enqueue time.
    #[serde(default)]
    pub schedule_after: Option<Timestamp>,
    #[serde(default)]
    pub deadline: Option<Timestamp>,
    #[serde(default)]
    pub source_recommendation_id: Option<DbId>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl NewJob {
    /// Build a job with an empty config, eligible immediately, no deadline.
    pub fn new(
        priority: Priority,
        job_type: impl Into<String>,
        title: impl Into<String>,
        provider: impl Into<String>,
        estimated_duration_secs: i32,
    ) -> Self {
        Self {
            priority,
            job_type: job_type.into(),
            title: title.into(),
            job_config: empty_object(),
            estimated_duration_secs,
            provider: provider.into(),
            schedule_after: None,
            deadline: None,
            source_recommendation_id: None,
        }
    }

    pub fn with_config(mut self, job_config: serde_json::Value) -> Self {
        self.job_config = job_config;
        self
    }

    pub fn with_schedule_after(mut self, schedule_after: Timestamp) -> Self {
        self.schedule_after = Some(schedule_after);
        self
    }

    pub fn with_deadline(mut self, deadline: Timestamp) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_recommendation(mut self, recommendation_id: DbId) -> Self {
        self.source_recommendation_id = Some(recommendation_id);
        self
    }
}

/// Result of a successful execution, stored by `complete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobCompletion {
    pub result_data: serde_json::Value,
    pub cost: Option<f64>,
    /// Stored as `NULL` when empty.
    pub output_urls: BTreeMap<String, String>,
}

impl JobCompletion {
    /// Output URLs as the JSON value stored in the `output_urls` column.
    pub fn output_urls_json(&self) -> Option<serde_json::Value> {
        if self.output_urls.is_empty() {
            None
        } else {
            serde_json::to_value(&self.output_urls).ok()
        }
    }
}
