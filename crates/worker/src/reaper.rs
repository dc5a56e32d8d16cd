//! Stuck-job reaper.
//!
//! Force-fails jobs that have been processing for more than twice their
//! estimated duration. Runs at the start of every dispatcher tick so the
//! capacity it frees is visible to the same tick.

use std::sync::Arc;

use cadence_core::scheduling::{stuck_threshold_secs, STUCK_MESSAGE};
use cadence_core::types::{DbId, Timestamp};
use cadence_db::{JobStore, StoreError};
use cadence_events::{event_types, EventBus, JobEvent};

pub struct StuckJobReaper {
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
}

impl StuckJobReaper {
    pub fn new(store: Arc<dyn JobStore>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// Fail every stuck job and return the ids that were reaped.
    ///
    /// A job that finished between the listing and the update is skipped.
    pub async fn sweep(&self, now: Timestamp) -> Result<Vec<DbId>, StoreError> {
        let stuck = self.store.list_stuck(now).await?;
        let mut reaped = Vec::with_capacity(stuck.len());

        for job in stuck {
            let elapsed_secs = job.elapsed_secs(now).unwrap_or_default();
            let max_secs = stuck_threshold_secs(job.estimated_duration_secs);
            let details = serde_json::json!({
                "elapsed_secs": elapsed_secs,
                "max_secs": max_secs,
            });

            match self.store.fail(job.id, STUCK_MESSAGE, Some(&details), now).await {
                Ok(_) => {
                    tracing::warn!(
                        job_id = job.id,
                        provider = %job.provider,
                        job_type = %job.job_type,
                        elapsed_secs,
                        max_secs,
                        "Reaped stuck job",
                    );
                    self.events.publish(
                        JobEvent::new(event_types::JOB_REAPED, job.id)
                            .with_job(&job.provider, &job.job_type)
                            .with_payload(details),
                    );
                    reaped.push(job.id);
                }
                Err(StoreError::InvalidTransition { .. }) => {
                    tracing::debug!(job_id = job.id, "Stuck job resolved before reaping");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(reaped)
    }
}
