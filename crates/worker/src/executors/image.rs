//! Image generation executor: a single synchronous call to the image engine.

use async_trait::async_trait;
use cadence_db::models::job::Job;

use super::http::{config_object, ProviderClient};
use super::{ExecutionOutput, Executor, ExecutorError};

/// Posts `{"job_id", "title", "config"}` to `{base}/images` and takes the
/// response body as the [`ExecutionOutput`].
pub struct ImageExecutor {
    client: ProviderClient,
}

impl ImageExecutor {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for ImageExecutor {
    async fn execute(&self, job: &Job) -> Result<ExecutionOutput, ExecutorError> {
        let config = config_object(&job.job_config)?;
        if !config.contains_key("prompt") {
            return Err(ExecutorError::InvalidConfig(
                "image jobs require a 'prompt'".to_string(),
            ));
        }

        let body = serde_json::json!({
            "job_id": job.id,
            "title": job.title,
            "config": job.job_config,
        });
        self.client.post_json("images", &body).await
    }
}
