//! Job scheduling primitives: priorities, claim ordering, the status state
//! machine and the stuck-job threshold.
//!
//! This module lives in `core` (zero internal deps) so the PostgreSQL store,
//! the in-memory store and the dispatcher agree on ordering and transitions.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Job priority. A lower value is more urgent and is claimed first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(i16)]
pub enum Priority {
    P0 = 0,
    P1 = 1,
    #[default]
    P2 = 2,
    P3 = 3,
}

impl Priority {
    /// Return the value stored in the `priority` SMALLINT column.
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Map a stored `priority` column back to the enum.
    pub fn from_i16(value: i16) -> Result<Self, CoreError> {
        match value {
            0 => Ok(Self::P0),
            1 => Ok(Self::P1),
            2 => Ok(Self::P2),
            3 => Ok(Self::P3),
            other => Err(CoreError::Validation(format!(
                "Priority must be between 0 and 3, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.as_i16())
    }
}

// ---------------------------------------------------------------------------
// Claim ordering
// ---------------------------------------------------------------------------

/// The fields that decide which queued job is claimed next for a provider.
///
/// Ordering: priority ascending, then earliest deadline (jobs without a
/// deadline sort after all jobs with one), then creation time, then id.
/// This mirrors the `ORDER BY` of the PostgreSQL claim query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimKey {
    pub priority: i16,
    pub deadline: Option<Timestamp>,
    pub created_at: Timestamp,
    pub id: DbId,
}

impl Ord for ClaimKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| match (self.deadline, other.deadline) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ClaimKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Stuck detection
// ---------------------------------------------------------------------------

/// A processing job is stuck once it has run for more than this multiple of
/// its estimated duration.
pub const STUCK_MULTIPLIER: i32 = 2;

/// Error message recorded on jobs force-failed by the reaper.
pub const STUCK_MESSAGE: &str = "stuck: exceeded 2x estimated duration";

/// Maximum allowed runtime in seconds before a job counts as stuck.
pub fn stuck_threshold_secs(estimated_duration_secs: i32) -> i64 {
    i64::from(estimated_duration_secs) * i64::from(STUCK_MULTIPLIER)
}

/// Whether a job started at `started_at` has exceeded its stuck threshold.
pub fn is_stuck(started_at: Timestamp, estimated_duration_secs: i32, now: Timestamp) -> bool {
    now - started_at > chrono::Duration::seconds(stuck_threshold_secs(estimated_duration_secs))
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Job status IDs matching `job_statuses` seed data (1-based SMALLSERIAL).
///
/// Duplicated from the `db` crate's `JobStatus` enum because `core` must
/// have zero internal deps.
pub mod state_machine {
    pub const QUEUED: i16 = 1;
    pub const PROCESSING: i16 = 2;
    pub const COMPLETED: i16 = 3;
    pub const FAILED: i16 = 4;

    /// Returns the set of valid target status IDs reachable from `from_status`.
    ///
    /// Terminal states (Completed, Failed) return an empty slice.
    pub fn valid_transitions(from_status: i16) -> &'static [i16] {
        match from_status {
            QUEUED => &[PROCESSING],
            PROCESSING => &[COMPLETED, FAILED],
            _ => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: i16, to: i16) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Lower-case name for a status ID, as used in logs and status counts.
    pub fn status_name(id: i16) -> &'static str {
        match id {
            QUEUED => "queued",
            PROCESSING => "processing",
            COMPLETED => "completed",
            FAILED => "failed",
            _ => "unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};

    use super::state_machine::*;
    use super::*;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn key(priority: i16, deadline: Option<i64>, created: i64, id: DbId) -> ClaimKey {
        ClaimKey {
            priority,
            deadline: deadline.map(at),
            created_at: at(created),
            id,
        }
    }

    #[test]
    fn priority_round_trips_through_column_value() {
        for p in [Priority::P0, Priority::P1, Priority::P2, Priority::P3] {
            assert_eq!(Priority::from_i16(p.as_i16()).unwrap(), p);
        }
        assert_matches!(Priority::from_i16(7), Err(CoreError::Validation(_)));
    }

    #[test]
    fn priority_displays_as_label() {
        assert_eq!(Priority::P1.to_string(), "P1");
    }

    #[test]
    fn lower_priority_value_sorts_first() {
        assert!(key(0, None, 10, 2) < key(1, Some(0), 0, 1));
    }

    #[test]
    fn earlier_deadline_wins_within_priority() {
        assert!(key(1, Some(100), 50, 2) < key(1, Some(200), 0, 1));
    }

    #[test]
    fn missing_deadline_sorts_after_any_deadline() {
        assert!(key(1, Some(10_000), 50, 2) < key(1, None, 0, 1));
    }

    #[test]
    fn fifo_breaks_remaining_ties() {
        assert!(key(2, None, 0, 9) < key(2, None, 1, 1));
        assert!(key(2, None, 0, 1) < key(2, None, 0, 2));
    }

    #[test]
    fn stuck_after_twice_the_estimate() {
        let started = at(0);
        assert!(!is_stuck(started, 300, started + Duration::seconds(600)));
        assert!(is_stuck(started, 300, started + Duration::seconds(601)));
        assert_eq!(stuck_threshold_secs(45), 90);
    }

    #[test]
    fn fractional_overrun_counts_as_stuck() {
        let started = at(0);
        assert!(is_stuck(started, 60, started + Duration::milliseconds(120_900)));
        assert!(is_stuck(started, 60, started + Duration::milliseconds(120_001)));
        assert!(!is_stuck(started, 60, started + Duration::seconds(120)));
    }

    #[test]
    fn forward_transitions_are_valid() {
        assert!(can_transition(QUEUED, PROCESSING));
        assert!(can_transition(PROCESSING, COMPLETED));
        assert!(can_transition(PROCESSING, FAILED));
    }

    #[test]
    fn skipping_or_reversing_is_invalid() {
        assert!(!can_transition(QUEUED, COMPLETED));
        assert!(!can_transition(QUEUED, FAILED));
        assert!(!can_transition(PROCESSING, QUEUED));
        assert!(!can_transition(COMPLETED, FAILED));
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        assert!(valid_transitions(COMPLETED).is_empty());
        assert!(valid_transitions(FAILED).is_empty());
        assert_eq!(status_name(FAILED), "failed");
        assert_eq!(status_name(9), "unknown");
    }
}
