//! Orchestrator status snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cadence_core::types::{DbId, Timestamp};
use cadence_db::models::job::Job;
use serde::Serialize;
use tokio::task::AbortHandle;

/// A job this process has claimed and is currently executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlightJob {
    pub job_id: DbId,
    pub provider: String,
    pub job_type: String,
    pub started_at: Option<Timestamp>,
}

impl From<&Job> for InFlightJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            provider: job.provider.clone(),
            job_type: job.job_type.clone(),
            started_at: job.started_at,
        }
    }
}

#[derive(Debug)]
struct Entry {
    job: InFlightJob,
    abort: Option<AbortHandle>,
}

/// Shared set of executions owned by this process.
///
/// Only used for reporting and for tearing down executions whose job was
/// resolved elsewhere; capacity is always counted from the store.
#[derive(Debug, Clone, Default)]
pub struct InFlightJobs {
    inner: Arc<Mutex<HashMap<DbId, Entry>>>,
}

impl InFlightJobs {
    fn lock(&self) -> MutexGuard<'_, HashMap<DbId, Entry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, job: InFlightJob) {
        self.lock().insert(job.job_id, Entry { job, abort: None });
    }

    /// Attach the handle of the task executing `job_id`.
    ///
    /// A no-op if the execution already finished and removed itself.
    pub fn attach(&self, job_id: DbId, abort: AbortHandle) {
        if let Some(entry) = self.lock().get_mut(&job_id) {
            entry.abort = Some(abort);
        }
    }

    pub fn remove(&self, job_id: DbId) {
        self.lock().remove(&job_id);
    }

    /// Remove `job_id` and abort its execution task.
    ///
    /// Returns `false` if this process was not executing the job.
    pub fn release(&self, job_id: DbId) -> bool {
        let Some(entry) = self.lock().remove(&job_id) else {
            return false;
        };
        if let Some(abort) = entry.abort {
            abort.abort();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot ordered by job id.
    pub fn snapshot(&self) -> Vec<InFlightJob> {
        let mut jobs: Vec<InFlightJob> = self.lock().values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.job_id);
        jobs
    }
}

/// Answer to the status query.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub is_running: bool,
    /// Jobs in `processing` across all providers, from the store.
    pub active_job_count: i64,
    pub counts_by_status: BTreeMap<String, i64>,
    pub counts_by_type: BTreeMap<String, i64>,
    pub counts_by_provider: BTreeMap<String, i64>,
    /// Executions running in this process.
    pub in_flight: Vec<InFlightJob>,
}
