//! Job status ids mapping to the `job_statuses` lookup table.
//!
//! Each variant's discriminant matches the seed data in the migration.

use std::fmt;

use cadence_core::scheduling::state_machine;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Job execution status. Transitions only move forward:
/// queued -> processing -> completed | failed.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued = state_machine::QUEUED,
    Processing = state_machine::PROCESSING,
    Completed = state_machine::COMPLETED,
    Failed = state_machine::FAILED,
}

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a database status ID back to the enum.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            state_machine::QUEUED => Some(Self::Queued),
            state_machine::PROCESSING => Some(Self::Processing),
            state_machine::COMPLETED => Some(Self::Completed),
            state_machine::FAILED => Some(Self::Failed),
            _ => None,
        }
    }

    /// Lower-case name, matching `job_statuses.name`.
    pub fn name(self) -> &'static str {
        state_machine::status_name(self.id())
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(JobStatus::Queued.id(), 1);
        assert_eq!(JobStatus::Processing.id(), 2);
        assert_eq!(JobStatus::Completed.id(), 3);
        assert_eq!(JobStatus::Failed.id(), 4);
    }

    #[test]
    fn from_id_round_trips() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(JobStatus::from_id(9), None);
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = JobStatus::Processing.into();
        assert_eq!(id, 2);
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }
}
