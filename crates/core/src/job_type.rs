//! Job type discriminants.
//!
//! A job type is a dotted tag such as `video.render` or `social.post`. The
//! segment before the first dot names the [`JobFamily`], which selects the
//! executor family; the rest is free-form and interpreted by the executor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum length of a job type tag.
pub const MAX_JOB_TYPE_LEN: usize = 128;

/// Executor family selected by the job type prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobFamily {
    Video,
    Image,
    Social,
}

impl JobFamily {
    pub const ALL: [JobFamily; 3] = [JobFamily::Video, JobFamily::Image, JobFamily::Social];

    /// The prefix segment used in job type tags.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Social => "social",
        }
    }
}

impl fmt::Display for JobFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for JobFamily {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.prefix() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job family '{s}'")))
    }
}

/// Validate the shape of a job type tag and return its family.
///
/// Rules:
/// - Must not be empty or exceed [`MAX_JOB_TYPE_LEN`] characters.
/// - Must have at least two dot-separated segments, none empty.
/// - Segments may only contain lowercase alphanumerics, `-` and `_`.
/// - The first segment must name a known [`JobFamily`].
pub fn parse_job_type(job_type: &str) -> Result<JobFamily, CoreError> {
    if job_type.is_empty() {
        return Err(CoreError::Validation(
            "Job type must not be empty".to_string(),
        ));
    }
    if job_type.len() > MAX_JOB_TYPE_LEN {
        return Err(CoreError::Validation(format!(
            "Job type must not exceed {MAX_JOB_TYPE_LEN} characters"
        )));
    }

    let segments: Vec<&str> = job_type.split('.').collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::Validation(format!(
            "Job type '{job_type}' must look like '<family>.<kind>'"
        )));
    }
    let valid_chars = |s: &&str| {
        s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    };
    if !segments.iter().all(valid_chars) {
        return Err(CoreError::Validation(format!(
            "Job type '{job_type}' may only contain lowercase alphanumerics, '-', '_' and '.'"
        )));
    }

    segments[0].parse()
}
