//! In-process [`JobStore`] for tests and for running without a database.
//!
//! All state sits behind one mutex. Every operation, including claim's
//! select-and-mark, runs inside a single critical section, which gives the
//! same one-claimant guarantee as the PostgreSQL store within a process.
//! Nothing survives a restart.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cadence_core::scheduling::state_machine;
use cadence_core::types::{DbId, Timestamp};
use chrono::Utc;

use crate::models::job::{Job, JobCompletion, NewJob};
use crate::models::status::JobStatus;
use crate::store::{missed_transition, JobStore, StatusCounts, StoreError};

#[derive(Default)]
struct MemoryState {
    next_id: DbId,
    jobs: BTreeMap<DbId, Job>,
}

/// Mutex-guarded map of jobs keyed by id.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // No critical section can panic partway through a mutation.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a processing -> `to` transition under the lock.
    fn transition(
        &self,
        job_id: DbId,
        to: JobStatus,
        now: Timestamp,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Job, StoreError> {
        let mut state = self.lock();
        let job = match state.jobs.get_mut(&job_id) {
            Some(job) if state_machine::can_transition(job.status_id, to.id()) => job,
            other => return Err(missed_transition(job_id, other.map(|j| &*j), to)),
        };

        job.status_id = to.id();
        job.completed_at = Some(now);
        job.actual_duration_secs = job
            .started_at
            .map(|started| i32::try_from((now - started).num_seconds()).unwrap_or(i32::MAX));
        job.updated_at = Utc::now();
        apply(job);
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, input: &NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let mut state = self.lock();
        state.next_id += 1;
        let job = Job {
            id: state.next_id,
            priority: input.priority.as_i16(),
            job_type: input.job_type.clone(),
            title: input.title.clone(),
            job_config: input.job_config.clone(),
            provider: input.provider.clone(),
            status_id: JobStatus::Queued.id(),
            schedule_after: input.schedule_after.unwrap_or(now),
            deadline: input.deadline,
            estimated_duration_secs: input.estimated_duration_secs,
            started_at: None,
            completed_at: None,
            actual_duration_secs: None,
            result_data: None,
            cost: None,
            output_urls: None,
            error_message: None,
            error_details: None,
            source_recommendation_id: input.source_recommendation_id,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim_next(&self, provider: &str, now: Timestamp) -> Result<Option<Job>, StoreError> {
        let mut state = self.lock();
        let next_id = state
            .jobs
            .values()
            .filter(|job| {
                job.status() == Some(JobStatus::Queued)
                    && job.provider == provider
                    && job.schedule_after <= now
            })
            .min_by_key(|job| job.claim_key())
            .map(|job| job.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status_id = JobStatus::Processing.id();
        job.started_at = Some(now);
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        job_id: DbId,
        completion: &JobCompletion,
        now: Timestamp,
    ) -> Result<Job, StoreError> {
        self.transition(job_id, JobStatus::Completed, now, |job| {
            job.result_data = Some(completion.result_data.clone());
            job.cost = completion.cost;
            job.output_urls = completion.output_urls_json();
        })
    }

    async fn fail(
        &self,
        job_id: DbId,
        error_message: &str,
        error_details: Option<&serde_json::Value>,
        now: Timestamp,
    ) -> Result<Job, StoreError> {
        self.transition(job_id, JobStatus::Failed, now, |job| {
            job.error_message = Some(error_message.to_string());
            job.error_details = error_details.cloned();
        })
    }

    async fn list_stuck(&self, now: Timestamp) -> Result<Vec<Job>, StoreError> {
        let state = self.lock();
        let mut stuck: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.is_stuck(now))
            .cloned()
            .collect();
        stuck.sort_by_key(|job| job.started_at);
        Ok(stuck)
    }

    async fn count_processing(&self, provider: &str) -> Result<i64, StoreError> {
        let state = self.lock();
        let count = state
            .jobs
            .values()
            .filter(|job| job.provider == provider && job.status() == Some(JobStatus::Processing))
            .count();
        Ok(count as i64)
    }

    async fn find_by_id(&self, job_id: DbId) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(&job_id).cloned())
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let state = self.lock();
        let mut counts = StatusCounts::default();
        for job in state.jobs.values() {
            let status = job.status().map_or("unknown", JobStatus::name);
            *counts.by_status.entry(status.to_string()).or_default() += 1;
            *counts.by_type.entry(job.job_type.clone()).or_default() += 1;
            *counts.by_provider.entry(job.provider.clone()).or_default() += 1;
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use cadence_core::scheduling::Priority;
    use chrono::Duration;

    use super::*;

    fn video(priority: Priority, title: &str) -> NewJob {
        NewJob::new(priority, "video.render", title, "video", 300)
    }

    #[tokio::test]
    async fn enqueue_then_claim_returns_that_job() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(&video(Priority::P2, "only")).await.unwrap();
        assert_eq!(job.status(), Some(JobStatus::Queued));

        let now = Utc::now();
        let claimed = store.claim_next("video", now).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status(), Some(JobStatus::Processing));
        assert_eq!(claimed.started_at, Some(now));
    }

    #[tokio::test]
    async fn higher_priority_is_claimed_before_earlier_insert() {
        let store = MemoryJobStore::new();
        let a = store.enqueue(&video(Priority::P1, "A")).await.unwrap();
        let b = store.enqueue(&video(Priority::P0, "B")).await.unwrap();

        let now = Utc::now();
        assert_eq!(store.claim_next("video", now).await.unwrap().unwrap().id, b.id);
        assert_eq!(store.claim_next("video", now).await.unwrap().unwrap().id, a.id);
        assert!(store.claim_next("video", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn earlier_deadline_is_claimed_first_and_null_deadline_last() {
        let store = MemoryJobStore::new();
        let base = Utc::now();
        let no_deadline = store.enqueue(&video(Priority::P1, "none")).await.unwrap();
        let late = store
            .enqueue(&video(Priority::P1, "late").with_deadline(base + Duration::hours(2)))
            .await
            .unwrap();
        let soon = store
            .enqueue(&video(Priority::P1, "soon").with_deadline(base + Duration::hours(1)))
            .await
            .unwrap();

        let now = Utc::now();
        let mut order = Vec::new();
        while let Some(job) = store.claim_next("video", now).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec![soon.id, late.id, no_deadline.id]);
    }

    #[tokio::test]
    async fn claim_respects_provider_and_schedule_after() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store
            .enqueue(&NewJob::new(Priority::P0, "image.generate", "img", "ai-image", 30))
            .await
            .unwrap();
        store
            .enqueue(&video(Priority::P0, "later").with_schedule_after(now + Duration::minutes(5)))
            .await
            .unwrap();

        assert!(store.claim_next("video", now).await.unwrap().is_none());
        assert!(store
            .claim_next("video", now + Duration::minutes(5))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_hand_out_a_job_once() {
        let store = Arc::new(MemoryJobStore::new());
        store.enqueue(&video(Priority::P1, "contended")).await.unwrap();
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.claim_next("video", now).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn complete_requires_processing() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(&video(Priority::P1, "x")).await.unwrap();
        let now = Utc::now();

        let err = store
            .complete(job.id, &JobCompletion::default(), now)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Completed,
                ..
            }
        );

        store.claim_next("video", now).await.unwrap();
        let done = store
            .complete(
                job.id,
                &JobCompletion {
                    result_data: serde_json::json!({"frames": 240}),
                    cost: Some(1.25),
                    ..Default::default()
                },
                now + Duration::seconds(42),
            )
            .await
            .unwrap();
        assert_eq!(done.status(), Some(JobStatus::Completed));
        assert_eq!(done.actual_duration_secs, Some(42));
        assert_eq!(done.cost, Some(1.25));

        let again = store.fail(job.id, "late", None, now).await.unwrap_err();
        assert_matches!(
            again,
            StoreError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Failed,
                ..
            }
        );
    }

    #[tokio::test]
    async fn transitions_on_unknown_job_are_not_found() {
        let store = MemoryJobStore::new();
        let err = store.fail(99, "boom", None, Utc::now()).await.unwrap_err();
        assert_matches!(err, StoreError::NotFound(99));
    }

    #[tokio::test]
    async fn fail_records_message_and_details() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(&video(Priority::P1, "x")).await.unwrap();
        let now = Utc::now();
        store.claim_next("video", now).await.unwrap();

        let details = serde_json::json!({"attempt": 1});
        let failed = store
            .fail(job.id, "renderer offline", Some(&details), now)
            .await
            .unwrap();
        assert_eq!(failed.status(), Some(JobStatus::Failed));
        assert_eq!(failed.error_message.as_deref(), Some("renderer offline"));
        assert_eq!(failed.error_details, Some(details));
    }

    #[tokio::test]
    async fn list_stuck_uses_twice_the_estimate() {
        let store = MemoryJobStore::new();
        let job = store
            .enqueue(&NewJob::new(Priority::P1, "video.render", "x", "video", 60))
            .await
            .unwrap();
        let started = Utc::now();
        store.claim_next("video", started).await.unwrap();

        assert!(store
            .list_stuck(started + Duration::seconds(120))
            .await
            .unwrap()
            .is_empty());
        let overrun = store
            .list_stuck(started + Duration::milliseconds(120_900))
            .await
            .unwrap();
        assert_eq!(overrun.len(), 1);
        let stuck = store.list_stuck(started + Duration::seconds(121)).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, job.id);
    }

    #[tokio::test]
    async fn counts_group_by_status_type_and_provider() {
        let store = MemoryJobStore::new();
        store.enqueue(&video(Priority::P1, "a")).await.unwrap();
        store.enqueue(&video(Priority::P1, "b")).await.unwrap();
        store
            .enqueue(&NewJob::new(Priority::P1, "social.post", "c", "social", 5))
            .await
            .unwrap();
        store.claim_next("video", Utc::now()).await.unwrap();

        assert_eq!(store.count_processing("video").await.unwrap(), 1);
        assert_eq!(store.count_processing("social").await.unwrap(), 0);

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.by_status.get("queued"), Some(&2));
        assert_eq!(counts.by_status.get("processing"), Some(&1));
        assert_eq!(counts.by_type.get("video.render"), Some(&2));
        assert_eq!(counts.by_provider.get("social"), Some(&1));
    }
}
