//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`JobEvent`]s to any number of subscribers. It is
//! shared via `Arc<EventBus>` between the dispatcher, its execution tasks
//! and the reaper.

use cadence_core::types::{DbId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event type names.
pub mod event_types {
    pub const JOB_ENQUEUED: &str = "job.enqueued";
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_REAPED: &str = "job.reaped";
    pub const RECOMMENDATION_REPORT_FAILED: &str = "recommendation.report_failed";
}

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A lifecycle event for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event_type: String,
    pub job_id: DbId,
    pub provider: Option<String>,
    pub job_type: Option<String>,
    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
}

impl JobEvent {
    /// Create an event with an empty payload.
    pub fn new(event_type: impl Into<String>, job_id: DbId) -> Self {
        Self {
            event_type: event_type.into(),
            job_id,
            provider: None,
            job_type: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the job's provider and type.
    pub fn with_job(mut self, provider: impl Into<String>, job_type: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use cadence_events::{event_types, EventBus, JobEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::new(event_types::JOB_ENQUEUED, 1));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed events are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: JobEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
