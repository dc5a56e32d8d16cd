use std::str::FromStr;
use std::time::Duration;

use cadence_core::error::CoreError;
use cadence_core::providers::{default_provider_limits, parse_provider_limits, ProviderLimits};

/// Orchestrator configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. Executor and
/// feed URLs are optional; a family without a URL is simply not registered.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// PostgreSQL URL. When `None` the in-memory store is used.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Dispatcher tick interval.
    pub tick_interval: Duration,
    /// Grace period for in-flight executions on shutdown.
    pub shutdown_timeout: Duration,
    pub providers: Vec<ProviderLimits>,
    pub executors: ExecutorEndpoints,
    /// Base URL of the recommendation feed. `None` selects the no-op feed.
    pub recommendation_callback_url: Option<String>,
}

/// Base URLs and timing for the HTTP executors.
#[derive(Debug, Clone)]
pub struct ExecutorEndpoints {
    pub video_engine_url: Option<String>,
    pub image_engine_url: Option<String>,
    pub social_publisher_url: Option<String>,
    /// Timeout for a single provider HTTP request.
    pub request_timeout: Duration,
    /// Poll cadence for asynchronous video renders.
    pub video_poll_interval: Duration,
}

impl Default for ExecutorEndpoints {
    fn default() -> Self {
        Self {
            video_engine_url: None,
            image_engine_url: None,
            social_publisher_url: None,
            request_timeout: Duration::from_secs(60),
            video_poll_interval: Duration::from_secs(5),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            tick_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            providers: default_provider_limits(),
            executors: ExecutorEndpoints::default(),
            recommendation_callback_url: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default                                                        |
    /// |---------------------------------|----------------------------------------------------------------|
    /// | `DATABASE_URL`                  | unset (in-memory store)                                        |
    /// | `DATABASE_MAX_CONNECTIONS`      | `10`                                                           |
    /// | `TICK_INTERVAL_SECS`            | `10`                                                           |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                                                           |
    /// | `PROVIDER_LIMITS`               | `video-engine:2:10,ai-text:5:1,ai-image:5:1,social-publisher:3:5` |
    /// | `VIDEO_ENGINE_URL`              | unset                                                          |
    /// | `IMAGE_ENGINE_URL`              | unset                                                          |
    /// | `SOCIAL_PUBLISHER_URL`          | unset                                                          |
    /// | `EXECUTOR_REQUEST_TIMEOUT_SECS` | `60`                                                           |
    /// | `VIDEO_POLL_INTERVAL_SECS`      | `5`                                                            |
    /// | `RECOMMENDATION_CALLBACK_URL`   | unset (no-op feed)                                             |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let providers = match get("PROVIDER_LIMITS") {
            Some(raw) => parse_provider_limits(&raw)?,
            None => defaults.providers,
        };

        let executors = ExecutorEndpoints {
            video_engine_url: get("VIDEO_ENGINE_URL").map(trim_url),
            image_engine_url: get("IMAGE_ENGINE_URL").map(trim_url),
            social_publisher_url: get("SOCIAL_PUBLISHER_URL").map(trim_url),
            request_timeout: parse_secs(
                get("EXECUTOR_REQUEST_TIMEOUT_SECS"),
                "EXECUTOR_REQUEST_TIMEOUT_SECS",
                defaults.executors.request_timeout,
            )?,
            video_poll_interval: parse_secs(
                get("VIDEO_POLL_INTERVAL_SECS"),
                "VIDEO_POLL_INTERVAL_SECS",
                defaults.executors.video_poll_interval,
            )?,
        };

        let tick_interval = parse_secs(
            get("TICK_INTERVAL_SECS"),
            "TICK_INTERVAL_SECS",
            defaults.tick_interval,
        )?;
        if tick_interval.is_zero() {
            return Err(CoreError::Validation(
                "TICK_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_var(
                get("DATABASE_MAX_CONNECTIONS"),
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            tick_interval,
            shutdown_timeout: parse_secs(
                get("SHUTDOWN_TIMEOUT_SECS"),
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout,
            )?,
            providers,
            executors,
            recommendation_callback_url: get("RECOMMENDATION_CALLBACK_URL").map(trim_url),
        })
    }
}

fn trim_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_var<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, CoreError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

fn parse_secs(value: Option<String>, key: &str, default: Duration) -> Result<Duration, CoreError> {
    parse_var(value, key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<OrchestratorConfig, CoreError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OrchestratorConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.providers.len(), 4);
        assert!(config.executors.video_engine_url.is_none());
        assert!(config.recommendation_callback_url.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/cadence"),
            ("TICK_INTERVAL_SECS", "3"),
            ("PROVIDER_LIMITS", "video:1:30"),
            ("VIDEO_ENGINE_URL", "http://render.local/ "),
            ("RECOMMENDATION_CALLBACK_URL", "http://feed.local/"),
        ])
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/cadence"));
        assert_eq!(config.tick_interval, Duration::from_secs(3));
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].max_concurrent, 1);
        assert_eq!(
            config.executors.video_engine_url.as_deref(),
            Some("http://render.local")
        );
        assert_eq!(
            config.recommendation_callback_url.as_deref(),
            Some("http://feed.local")
        );
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[("DATABASE_URL", "  "), ("TICK_INTERVAL_SECS", "")]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.tick_interval, Duration::from_secs(10));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(config_from(&[("TICK_INTERVAL_SECS", "soon")]).is_err());
        assert!(config_from(&[("TICK_INTERVAL_SECS", "0")]).is_err());
        assert!(config_from(&[("DATABASE_MAX_CONNECTIONS", "-1")]).is_err());
        assert!(config_from(&[("PROVIDER_LIMITS", "video")]).is_err());
    }
}
