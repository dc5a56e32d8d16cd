//! Reporting produced artifacts back to the Recommendation Feed.
//!
//! Reports are best-effort: the dispatcher logs a failed report and moves
//! on. The job is already `completed` by the time a report is sent.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::types::DbId;

/// HTTP request timeout for a single report.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The feed returned a non-2xx status code.
    #[error("Recommendation feed returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// RecommendationFeed
// ---------------------------------------------------------------------------

/// Narrow "mark published" interface onto the upstream recommendation.
#[async_trait]
pub trait RecommendationFeed: Send + Sync {
    async fn report_published(
        &self,
        recommendation_id: DbId,
        output_urls: &BTreeMap<String, String>,
    ) -> Result<(), FeedError>;
}

/// POSTs `{"output_urls": {...}}` to
/// `{base}/recommendations/{id}/published`. No retries.
pub struct WebhookRecommendationFeed {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookRecommendationFeed {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn published_url(&self, recommendation_id: DbId) -> String {
        format!(
            "{}/recommendations/{recommendation_id}/published",
            self.base_url
        )
    }
}

#[async_trait]
impl RecommendationFeed for WebhookRecommendationFeed {
    async fn report_published(
        &self,
        recommendation_id: DbId,
        output_urls: &BTreeMap<String, String>,
    ) -> Result<(), FeedError> {
        let payload = serde_json::json!({ "output_urls": output_urls });
        let response = self
            .client
            .post(self.published_url(recommendation_id))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(FeedError::HttpStatus(status.as_u16()))
        }
    }
}

/// Feed used when no callback URL is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecommendationFeed;

#[async_trait]
impl RecommendationFeed for NoopRecommendationFeed {
    async fn report_published(
        &self,
        recommendation_id: DbId,
        output_urls: &BTreeMap<String, String>,
    ) -> Result<(), FeedError> {
        tracing::debug!(
            recommendation_id,
            outputs = output_urls.len(),
            "No recommendation feed configured, skipping report"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn published_url_is_built_from_base() {
        let feed = WebhookRecommendationFeed::new("http://feed.local/").unwrap();
        assert_eq!(
            feed.published_url(42),
            "http://feed.local/recommendations/42/published"
        );
    }

    #[tokio::test]
    async fn noop_feed_always_succeeds() {
        let urls = BTreeMap::from([("video".to_string(), "https://cdn.example/v.mp4".to_string())]);
        assert!(NoopRecommendationFeed.report_published(1, &urls).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_feed_is_a_request_error() {
        let feed = WebhookRecommendationFeed::new("http://127.0.0.1:1").unwrap();
        let err = feed.report_published(9, &BTreeMap::new()).await.unwrap_err();
        assert_matches!(err, FeedError::Request(_));
    }

    #[test]
    fn status_error_message() {
        assert_eq!(
            FeedError::HttpStatus(502).to_string(),
            "Recommendation feed returned HTTP 502"
        );
    }
}
