//! Shared HTTP client for provider executors.
//!
//! Wraps [`reqwest`] with a per-request timeout, JSON helpers and a single
//! retry for transient connect/timeout failures. Retries stop there; the
//! dispatcher never re-queues a failed job.

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::ExecutorError;

/// Delay before the single transient-error retry.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// HTTP client bound to one provider base URL.
#[derive(Clone)]
pub struct ProviderClient {
    client: reqwest::Client,
    base_url: String,
    retry_delay: Duration,
}

impl ProviderClient {
    /// Create a client for `base_url` (e.g. `http://render:8080`).
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry_delay: TRANSIENT_RETRY_DELAY,
        })
    }

    /// Override the transient retry delay.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `POST {base}/{path}` with a JSON body, decoding a JSON response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ExecutorError> {
        let url = self.url(path);
        let response = match self.client.post(&url).json(body).send().await {
            Err(e) if is_transient(&e) => {
                tracing::warn!(url = %url, error = %e, "Transient provider error, retrying once");
                tokio::time::sleep(self.retry_delay).await;
                self.client.post(&url).json(body).send().await?
            }
            other => other?,
        };
        Self::parse_response(response).await
    }

    /// `GET {base}/{path}`, decoding a JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExecutorError> {
        let url = self.url(path);
        let response = match self.client.get(&url).send().await {
            Err(e) if is_transient(&e) => {
                tracing::warn!(url = %url, error = %e, "Transient provider error, retrying once");
                tokio::time::sleep(self.retry_delay).await;
                self.client.get(&url).send().await?
            }
            other => other?,
        };
        Self::parse_response(response).await
    }

    /// Map non-2xx responses to [`ExecutorError::Provider`] and decode the body.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExecutorError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ExecutorError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

/// Require `job_config` to be a JSON object.
pub fn config_object(
    config: &serde_json::Value,
) -> Result<&serde_json::Map<String, serde_json::Value>, ExecutorError> {
    config
        .as_object()
        .ok_or_else(|| ExecutorError::InvalidConfig("job_config must be a JSON object".to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let client = ProviderClient::new("http://render.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://render.local");
        assert_eq!(client.url("/renders"), "http://render.local/renders");
        assert_eq!(client.url("renders/7"), "http://render.local/renders/7");
    }

    #[test]
    fn config_must_be_an_object() {
        assert!(config_object(&serde_json::json!({"a": 1})).is_ok());
        assert_matches!(
            config_object(&serde_json::json!([1, 2])),
            Err(ExecutorError::InvalidConfig(_))
        );
    }

    #[tokio::test]
    async fn unreachable_provider_fails_after_one_retry() {
        // Port 1 on loopback refuses connections.
        let client = ProviderClient::new("http://127.0.0.1:1", Duration::from_secs(2))
            .unwrap()
            .with_retry_delay(Duration::from_millis(10));
        let err = client
            .post_json::<serde_json::Value>("renders", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_matches!(err, ExecutorError::Request(_));
        assert_eq!(err.kind(), "request");
    }
}
