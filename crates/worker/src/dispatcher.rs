//! The orchestrator: enqueue, tick, status and shutdown.
//!
//! Each tick reaps stuck jobs, then visits every configured provider once:
//! capacity check, pacing check, atomic claim, and a detached execution
//! task. The tick never waits on an executor. Execution tasks resolve their
//! job to `completed` or `failed` no matter how the executor ends,
//! including by panicking. When the reaper fails a job this process is
//! still executing, the execution is aborted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::error::CoreError;
use cadence_core::job_type::parse_job_type;
use cadence_core::providers::ProviderLimits;
use cadence_core::types::{DbId, Timestamp};
use cadence_db::models::job::{Job, JobCompletion, NewJob};
use cadence_db::models::status::JobStatus;
use cadence_db::{JobStore, StoreError};
use cadence_events::{event_types, EventBus, JobEvent};
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use validator::Validate;

use crate::capacity::{CapacityTracker, PacingState};
use crate::error::OrchestratorError;
use crate::executors::{ExecutorError, ExecutorRegistry};
use crate::feed::{NoopRecommendationFeed, RecommendationFeed};
use crate::reaper::StuckJobReaper;
use crate::scheduler::{self, Scheduler};
use crate::status::{InFlightJob, InFlightJobs, OrchestratorStatus};

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// Why a provider started nothing this tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    AtCapacity { active: i64, max: u32 },
    Paced { remaining: Duration },
    NothingEligible,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// Jobs force-failed by the reaper.
    pub reaped: Vec<DbId>,
    /// Jobs claimed and handed to an executor.
    pub dispatched: Vec<DbId>,
    /// Providers that started nothing, in visit order.
    pub skipped: Vec<(String, SkipReason)>,
    /// Providers whose capacity check or claim hit a store error.
    pub provider_errors: usize,
}

impl TickReport {
    /// Nothing reaped, nothing dispatched, no errors.
    pub fn is_idle(&self) -> bool {
        self.reaped.is_empty() && self.dispatched.is_empty() && self.provider_errors == 0
    }

    pub fn skip_reason(&self, provider: &str) -> Option<&SkipReason> {
        self.skipped
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, reason)| reason)
    }
}

enum ProviderOutcome {
    Started(DbId),
    Skipped(SkipReason),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    feed: Arc<dyn RecommendationFeed>,
    events: Arc<EventBus>,
    capacity: CapacityTracker,
    pacing: Mutex<PacingState>,
    reaper: StuckJobReaper,
    in_flight: InFlightJobs,
    tasks: TaskTracker,
    running: AtomicBool,
}

impl Orchestrator {
    /// Build an orchestrator with a no-op feed and a private event bus.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: ExecutorRegistry,
        providers: Vec<ProviderLimits>,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        Self {
            capacity: CapacityTracker::new(Arc::clone(&store), providers),
            reaper: StuckJobReaper::new(Arc::clone(&store), Arc::clone(&events)),
            store,
            registry: Arc::new(registry),
            feed: Arc::new(NoopRecommendationFeed),
            events,
            pacing: Mutex::new(PacingState::new()),
            in_flight: InFlightJobs::default(),
            tasks: TaskTracker::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_feed(mut self, feed: Arc<dyn RecommendationFeed>) -> Self {
        self.feed = feed;
        self
    }

    /// Publish lifecycle events on a shared bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.reaper = StuckJobReaper::new(Arc::clone(&self.store), Arc::clone(&events));
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn capacity(&self) -> &CapacityTracker {
        &self.capacity
    }

    fn pacing(&self) -> MutexGuard<'_, PacingState> {
        self.pacing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ----- Enqueue -----

    /// Validate and persist a new job, returning its id.
    ///
    /// Rejects unknown providers and job types nothing can execute before
    /// anything is written.
    pub async fn enqueue(&self, job: NewJob) -> Result<DbId, OrchestratorError> {
        job.validate()?;
        if !self.capacity.is_configured(&job.provider) {
            return Err(CoreError::Validation(format!("Unknown provider '{}'", job.provider)).into());
        }
        parse_job_type(&job.job_type)?;
        if !self.registry.supports(&job.job_type) {
            return Err(CoreError::Validation(format!(
                "No executor registered for job type '{}'",
                job.job_type
            ))
            .into());
        }

        let created = self.store.enqueue(&job).await?;
        tracing::info!(
            job_id = created.id,
            provider = %created.provider,
            job_type = %created.job_type,
            priority = %job.priority,
            "Job enqueued",
        );
        self.events.publish(
            JobEvent::new(event_types::JOB_ENQUEUED, created.id)
                .with_job(&created.provider, &created.job_type),
        );
        Ok(created.id)
    }

    // ----- Tick -----

    /// Reap, then give every provider one chance to start a job.
    ///
    /// A reaper failure aborts the tick. A store failure for one provider
    /// is logged and counted, and the remaining providers still run.
    pub async fn tick(&self, now: Timestamp) -> Result<TickReport, OrchestratorError> {
        let mut report = TickReport {
            reaped: self.reaper.sweep(now).await?,
            ..Default::default()
        };
        for &job_id in &report.reaped {
            if self.in_flight.release(job_id) {
                tracing::warn!(job_id, "Aborted execution of reaped job");
            }
        }

        for limits in self.capacity.providers() {
            match self.dispatch_provider(limits, now).await {
                Ok(ProviderOutcome::Started(job_id)) => report.dispatched.push(job_id),
                Ok(ProviderOutcome::Skipped(reason)) => {
                    tracing::debug!(provider = %limits.name, ?reason, "Provider skipped");
                    report.skipped.push((limits.name.clone(), reason));
                }
                Err(e) => {
                    tracing::error!(provider = %limits.name, error = %e, "Provider dispatch failed");
                    report.provider_errors += 1;
                }
            }
        }

        Ok(report)
    }

    async fn dispatch_provider(
        &self,
        limits: &ProviderLimits,
        now: Timestamp,
    ) -> Result<ProviderOutcome, StoreError> {
        let capacity = self.capacity.available(&limits.name).await?;
        if !capacity.is_available {
            return Ok(ProviderOutcome::Skipped(SkipReason::AtCapacity {
                active: capacity.active_count,
                max: capacity.max_concurrent,
            }));
        }

        let remaining = self.pacing().remaining(&limits.name, limits.min_interval, now);
        if !remaining.is_zero() {
            return Ok(ProviderOutcome::Skipped(SkipReason::Paced { remaining }));
        }

        let Some(job) = self.store.claim_next(&limits.name, now).await? else {
            return Ok(ProviderOutcome::Skipped(SkipReason::NothingEligible));
        };
        self.pacing().record_start(&limits.name, now);

        tracing::info!(
            job_id = job.id,
            provider = %job.provider,
            job_type = %job.job_type,
            active = capacity.active_count + 1,
            max_concurrent = capacity.max_concurrent,
            "Job claimed",
        );
        self.events.publish(
            JobEvent::new(event_types::JOB_STARTED, job.id).with_job(&job.provider, &job.job_type),
        );

        let job_id = job.id;
        self.in_flight.insert(InFlightJob::from(&job));
        self.spawn_execution(job);
        Ok(ProviderOutcome::Started(job_id))
    }

    fn spawn_execution(&self, job: Job) {
        let execution = Execution {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            feed: Arc::clone(&self.feed),
            events: Arc::clone(&self.events),
            in_flight: self.in_flight.clone(),
        };
        let job_id = job.id;
        let handle = self.tasks.spawn(async move { execution.run(job).await });
        self.in_flight.attach(job_id, handle.abort_handle());
    }

    // ----- Status -----

    pub async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        let counts = self.store.status_counts().await?;
        let active_job_count = counts
            .by_status
            .get(JobStatus::Processing.name())
            .copied()
            .unwrap_or(0);

        Ok(OrchestratorStatus {
            is_running: self.is_running(),
            active_job_count,
            counts_by_status: counts.by_status,
            counts_by_type: counts.by_type,
            counts_by_provider: counts.by_provider,
            in_flight: self.in_flight.snapshot(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    // ----- Lifecycle -----

    /// Tick every `interval` until `cancel` fires. The first tick is immediate.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        scheduler::run(self, interval, cancel).await;
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait until every execution spawned so far has resolved its job.
    pub async fn wait_for_in_flight(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Stop accepting executions and wait up to `timeout` for running ones.
    ///
    /// Returns `false` if executions were still running at the deadline;
    /// their jobs stay `processing` and fall to the next reaper.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tasks.close();
        let pending = self.tasks.len();
        if pending > 0 {
            tracing::info!(pending, timeout_secs = timeout.as_secs(), "Waiting for in-flight jobs");
        }

        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.tasks.len(),
                    "Shutdown timeout reached with jobs still running",
                );
                false
            }
        }
    }
}

#[async_trait]
impl Scheduler for Orchestrator {
    async fn tick(&self, now: Timestamp) -> Result<TickReport, OrchestratorError> {
        Orchestrator::tick(self, now).await
    }
}

// ---------------------------------------------------------------------------
// Execution task
// ---------------------------------------------------------------------------

/// Everything one detached execution needs, owned.
struct Execution {
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    feed: Arc<dyn RecommendationFeed>,
    events: Arc<EventBus>,
    in_flight: InFlightJobs,
}

impl Execution {
    async fn run(self, job: Job) {
        let outcome = self.execute_contained(&job).await;
        match outcome {
            Ok(completion) => self.complete(&job, completion).await,
            Err(e) => self.fail(&job, e).await,
        }
        self.in_flight.remove(job.id);
    }

    /// Run the executor on its own task so a panic surfaces as an error.
    async fn execute_contained(&self, job: &Job) -> Result<JobCompletion, ExecutorError> {
        let registry = Arc::clone(&self.registry);
        let owned = job.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move { registry.execute(&owned).await }));
        match (&mut task.0).await {
            Ok(result) => result.map(JobCompletion::from),
            Err(join_err) if join_err.is_panic() => {
                Err(ExecutorError::Panicked(panic_message(join_err.into_panic())))
            }
            Err(join_err) => Err(ExecutorError::Panicked(join_err.to_string())),
        }
    }

    async fn complete(&self, job: &Job, completion: JobCompletion) {
        let done = match self.store.complete(job.id, &completion, Utc::now()).await {
            Ok(done) => done,
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    job_id = job.id,
                    status = %from,
                    "Job finished after it was already resolved, result discarded",
                );
                return;
            }
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Failed to record job completion");
                return;
            }
        };

        tracing::info!(
            job_id = done.id,
            provider = %done.provider,
            job_type = %done.job_type,
            actual_duration_secs = done.actual_duration_secs,
            cost = done.cost,
            "Job completed",
        );
        self.events.publish(
            JobEvent::new(event_types::JOB_COMPLETED, done.id)
                .with_job(&done.provider, &done.job_type)
                .with_payload(serde_json::json!({
                    "cost": done.cost,
                    "output_urls": completion.output_urls,
                    "actual_duration_secs": done.actual_duration_secs,
                })),
        );

        if let Some(recommendation_id) = done.source_recommendation_id {
            self.report_published(&done, recommendation_id, &completion.output_urls)
                .await;
        }
    }

    async fn report_published(
        &self,
        job: &Job,
        recommendation_id: DbId,
        output_urls: &BTreeMap<String, String>,
    ) {
        match self.feed.report_published(recommendation_id, output_urls).await {
            Ok(()) => {
                tracing::debug!(job_id = job.id, recommendation_id, "Recommendation marked published");
            }
            Err(e) => {
                tracing::warn!(
                    job_id = job.id,
                    recommendation_id,
                    error = %e,
                    "Failed to report to recommendation feed",
                );
                self.events.publish(
                    JobEvent::new(event_types::RECOMMENDATION_REPORT_FAILED, job.id)
                        .with_job(&job.provider, &job.job_type)
                        .with_payload(serde_json::json!({
                            "recommendation_id": recommendation_id,
                            "error": e.to_string(),
                        })),
                );
            }
        }
    }

    async fn fail(&self, job: &Job, error: ExecutorError) {
        let message = error.to_string();
        let details = serde_json::json!({
            "error_kind": error.kind(),
            "job_type": job.job_type,
            "provider": job.provider,
            "debug": format!("{error:?}"),
        });

        match self.store.fail(job.id, &message, Some(&details), Utc::now()).await {
            Ok(_) => {
                tracing::warn!(
                    job_id = job.id,
                    provider = %job.provider,
                    job_type = %job.job_type,
                    error = %message,
                    "Job failed",
                );
                self.events.publish(
                    JobEvent::new(event_types::JOB_FAILED, job.id)
                        .with_job(&job.provider, &job.job_type)
                        .with_payload(serde_json::json!({
                            "error_kind": error.kind(),
                            "error": message,
                        })),
                );
            }
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    job_id = job.id,
                    status = %from,
                    error = %message,
                    "Job failed after it was already resolved",
                );
            }
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Failed to record job failure");
            }
        }
    }
}

/// Aborts the executor task if the execution is dropped mid-flight.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_report() {
        let mut report = TickReport::default();
        assert!(report.is_idle());
        report
            .skipped
            .push(("video-engine".to_string(), SkipReason::NothingEligible));
        assert!(report.is_idle());
        assert_eq!(
            report.skip_reason("video-engine"),
            Some(&SkipReason::NothingEligible)
        );
        report.dispatched.push(1);
        assert!(!report.is_idle());
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
