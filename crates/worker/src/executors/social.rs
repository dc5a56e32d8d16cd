//! Social post executor.
//!
//! `job_config` must deserialize into [`SocialPostConfig`]. The publisher
//! answers with the usual [`ExecutionOutput`] shape, typically carrying the
//! live post URL under `output_urls.post`.

use async_trait::async_trait;
use cadence_db::models::job::Job;
use serde::{Deserialize, Serialize};

use super::http::ProviderClient;
use super::{ExecutionOutput, Executor, ExecutorError};

/// Maximum post body length accepted before calling the publisher.
const MAX_CONTENT_LEN: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPostConfig {
    pub platform: String,
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

impl SocialPostConfig {
    pub fn from_job(job: &Job) -> Result<Self, ExecutorError> {
        let config: Self = serde_json::from_value(job.job_config.clone())
            .map_err(|e| ExecutorError::InvalidConfig(e.to_string()))?;
        if config.platform.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig(
                "platform must not be empty".to_string(),
            ));
        }
        if config.content.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig(
                "content must not be empty".to_string(),
            ));
        }
        if config.content.chars().count() > MAX_CONTENT_LEN {
            return Err(ExecutorError::InvalidConfig(format!(
                "content exceeds {MAX_CONTENT_LEN} characters"
            )));
        }
        Ok(config)
    }
}

pub struct SocialPostExecutor {
    client: ProviderClient,
}

impl SocialPostExecutor {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for SocialPostExecutor {
    async fn execute(&self, job: &Job) -> Result<ExecutionOutput, ExecutorError> {
        let config = SocialPostConfig::from_job(job)?;
        let body = serde_json::json!({
            "job_id": job.id,
            "platform": config.platform,
            "content": config.content,
            "media_urls": config.media_urls,
        });
        self.client.post_json("posts", &body).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn post_job(config: serde_json::Value) -> Job {
        let now = Utc::now();
        Job {
            id: 11,
            priority: 0,
            job_type: "social.post".to_string(),
            title: "Announce".to_string(),
            job_config: config,
            provider: "social-publisher".to_string(),
            status_id: 2,
            schedule_after: now,
            deadline: None,
            estimated_duration_secs: 5,
            started_at: Some(now),
            completed_at: None,
            actual_duration_secs: None,
            result_data: None,
            cost: None,
            output_urls: None,
            error_message: None,
            error_details: None,
            source_recommendation_id: Some(42),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn config_parses_with_optional_media() {
        let config = SocialPostConfig::from_job(&post_job(serde_json::json!({
            "platform": "mastodon",
            "content": "New episode out",
        })))
        .unwrap();
        assert_eq!(config.platform, "mastodon");
        assert!(config.media_urls.is_empty());
    }

    #[test]
    fn config_requires_platform_and_content() {
        assert_matches!(
            SocialPostConfig::from_job(&post_job(serde_json::json!({"content": "hi"}))),
            Err(ExecutorError::InvalidConfig(_))
        );
        assert_matches!(
            SocialPostConfig::from_job(&post_job(serde_json::json!({
                "platform": "mastodon",
                "content": "   ",
            }))),
            Err(ExecutorError::InvalidConfig(msg)) if msg.contains("content")
        );
    }

    #[test]
    fn overlong_content_is_rejected() {
        let content = "x".repeat(MAX_CONTENT_LEN + 1);
        assert_matches!(
            SocialPostConfig::from_job(&post_job(serde_json::json!({
                "platform": "mastodon",
                "content": content,
            }))),
            Err(ExecutorError::InvalidConfig(_))
        );
    }
}
