//! Provider capacity limits, defaults and parsing.
//!
//! A provider is a capacity pool (e.g. the video-synthesis backend). Each
//! has a concurrency ceiling and a minimum interval between job starts.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default provider names.
pub const VIDEO_ENGINE: &str = "video-engine";
pub const AI_TEXT: &str = "ai-text";
pub const AI_IMAGE: &str = "ai-image";
pub const SOCIAL_PUBLISHER: &str = "social-publisher";

/// Maximum length of a provider name.
const MAX_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Provider classes
// ---------------------------------------------------------------------------

/// Broad class of provider, used to pick default limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderClass {
    /// Slow, expensive synthesis (video).
    HeavySynthesis,
    /// Fast AI calls (text, image).
    FastAi,
    /// Publishing to external social platforms.
    Publishing,
}

impl ProviderClass {
    /// Default `(max_concurrent, min_interval)` for the class.
    pub fn default_limits(self) -> (u32, Duration) {
        match self {
            Self::HeavySynthesis => (2, Duration::from_secs(10)),
            Self::FastAi => (5, Duration::from_secs(1)),
            Self::Publishing => (3, Duration::from_secs(5)),
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderLimits
// ---------------------------------------------------------------------------

/// Static capacity configuration for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLimits {
    pub name: String,
    /// Upper bound on jobs in `processing` for this provider.
    pub max_concurrent: u32,
    /// Minimum time between two job starts for this provider.
    pub min_interval: Duration,
}

impl ProviderLimits {
    pub fn new(name: impl Into<String>, max_concurrent: u32, min_interval: Duration) -> Self {
        Self {
            name: name.into(),
            max_concurrent,
            min_interval,
        }
    }

    /// Build limits from a provider class's defaults.
    pub fn for_class(name: impl Into<String>, class: ProviderClass) -> Self {
        let (max_concurrent, min_interval) = class.default_limits();
        Self::new(name, max_concurrent, min_interval)
    }
}

/// The default provider table.
pub fn default_provider_limits() -> Vec<ProviderLimits> {
    vec![
        ProviderLimits::for_class(VIDEO_ENGINE, ProviderClass::HeavySynthesis),
        ProviderLimits::for_class(AI_TEXT, ProviderClass::FastAi),
        ProviderLimits::for_class(AI_IMAGE, ProviderClass::FastAi),
        ProviderLimits::for_class(SOCIAL_PUBLISHER, ProviderClass::Publishing),
    ]
}

// ---------------------------------------------------------------------------
// Parsing & validation
// ---------------------------------------------------------------------------

/// Validate a provider name.
///
/// Rules:
/// - Must not be empty or exceed `MAX_NAME_LEN` characters.
/// - Must contain only lowercase alphanumerics, `-` or `_`.
pub fn validate_provider_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Provider name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Provider name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(format!(
            "Provider name '{name}' may only contain lowercase alphanumerics, '-' or '_'"
        )));
    }
    Ok(())
}

/// Parse a comma-separated `name:max_concurrent:min_interval_secs` list.
///
/// Example: `video-engine:2:10,ai-text:5:1`.
pub fn parse_provider_limits(input: &str) -> Result<Vec<ProviderLimits>, CoreError> {
    let mut seen = HashSet::new();
    let mut limits = Vec::new();

    for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let [name, max, interval] = parts.as_slice() else {
            return Err(CoreError::Validation(format!(
                "Provider limit '{entry}' must be 'name:max_concurrent:min_interval_secs'"
            )));
        };

        validate_provider_name(name)?;
        if !seen.insert(name.to_string()) {
            return Err(CoreError::Validation(format!(
                "Provider '{name}' is configured more than once"
            )));
        }

        let max_concurrent: u32 = max.parse().map_err(|_| {
            CoreError::Validation(format!("Invalid max_concurrent '{max}' for '{name}'"))
        })?;
        if max_concurrent == 0 {
            return Err(CoreError::Validation(format!(
                "max_concurrent for '{name}' must be at least 1"
            )));
        }
        let interval_secs: u64 = interval.parse().map_err(|_| {
            CoreError::Validation(format!("Invalid min_interval '{interval}' for '{name}'"))
        })?;

        limits.push(ProviderLimits::new(
            *name,
            max_concurrent,
            Duration::from_secs(interval_secs),
        ));
    }

    if limits.is_empty() {
        return Err(CoreError::Validation(
            "At least one provider must be configured".to_string(),
        ));
    }
    Ok(limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_provider_classes() {
        let limits = default_provider_limits();
        let video = limits.iter().find(|l| l.name == VIDEO_ENGINE).unwrap();
        assert_eq!(video.max_concurrent, 2);
        assert_eq!(video.min_interval, Duration::from_secs(10));

        let text = limits.iter().find(|l| l.name == AI_TEXT).unwrap();
        assert_eq!(text.max_concurrent, 5);
        assert_eq!(text.min_interval, Duration::from_secs(1));

        let social = limits.iter().find(|l| l.name == SOCIAL_PUBLISHER).unwrap();
        assert_eq!(social.max_concurrent, 3);
        assert_eq!(social.min_interval, Duration::from_secs(5));
    }

    #[test]
    fn parses_limit_list() {
        let limits = parse_provider_limits("video:2:10, ai-text:5:1").unwrap();
        assert_eq!(
            limits,
            vec![
                ProviderLimits::new("video", 2, Duration::from_secs(10)),
                ProviderLimits::new("ai-text", 5, Duration::from_secs(1)),
            ]
        );
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_provider_limits("video:2").is_err());
        assert!(parse_provider_limits("video:two:10").is_err());
        assert!(parse_provider_limits("video:0:10").is_err());
        assert!(parse_provider_limits("video:2:-1").is_err());
        assert!(parse_provider_limits("Video:2:1").is_err());
    }

    #[test]
    fn rejects_duplicates_and_empty_lists() {
        assert!(parse_provider_limits("video:2:10,video:1:1").is_err());
        assert!(parse_provider_limits(" , ").is_err());
    }

    #[test]
    fn provider_name_rules() {
        assert!(validate_provider_name("social-publisher").is_ok());
        assert!(validate_provider_name("").is_err());
        assert!(validate_provider_name(&"x".repeat(65)).is_err());
        assert!(validate_provider_name("ai text").is_err());
    }
}
