//! Video render executor.
//!
//! Submits the job to the video engine, then polls the render's status
//! endpoint until it reaches a terminal state. The poll loop gives up a
//! margin before the job's stuck threshold, counted from `started_at` like
//! the reaper counts it, so the job is resolved by its own executor first.
//!
//! Wire format:
//!
//! - `POST {base}/renders` with `{"job_id", "title", "config"}` returns
//!   `{"render_id": "..."}`.
//! - `GET {base}/renders/{render_id}` returns
//!   `{"status": "queued" | "rendering" | "completed" | "failed", ...}`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cadence_core::scheduling::stuck_threshold_secs;
use cadence_core::types::Timestamp;
use cadence_db::models::job::Job;
use chrono::Utc;
use serde::Deserialize;

use super::http::{config_object, ProviderClient};
use super::{ExecutionOutput, Executor, ExecutorError};

/// Headroom between the executor giving up and the reaper's threshold.
const REAPER_MARGIN: Duration = Duration::from_secs(1);

/// How much longer `job` may be polled as of `now`.
fn render_budget(job: &Job, now: Timestamp) -> Duration {
    let threshold = chrono::Duration::seconds(stuck_threshold_secs(job.estimated_duration_secs));
    let elapsed = job
        .started_at
        .map_or_else(chrono::Duration::zero, |started| now - started);
    (threshold - elapsed)
        .to_std()
        .map_or(Duration::ZERO, |left| left.saturating_sub(REAPER_MARGIN))
}

fn secs_since(started_at: Option<Timestamp>) -> u64 {
    started_at.map_or(0, |started| {
        u64::try_from((Utc::now() - started).num_seconds()).unwrap_or(0)
    })
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    render_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RenderState {
    Queued,
    Rendering,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize)]
struct RenderStatus {
    status: RenderState,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result_data: Option<serde_json::Value>,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default)]
    output_urls: BTreeMap<String, String>,
}

pub struct VideoExecutor {
    client: ProviderClient,
    poll_interval: Duration,
}

impl VideoExecutor {
    pub fn new(client: ProviderClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    async fn submit(&self, job: &Job) -> Result<String, ExecutorError> {
        let body = serde_json::json!({
            "job_id": job.id,
            "title": job.title,
            "config": job.job_config,
        });
        let response: SubmitResponse = self.client.post_json("renders", &body).await?;
        Ok(response.render_id)
    }

    async fn wait_for_render(
        &self,
        render_id: &str,
        deadline: Instant,
        job_started_at: Option<Timestamp>,
    ) -> Result<RenderStatus, ExecutorError> {
        let path = format!("renders/{render_id}");
        loop {
            let status: RenderStatus = self.client.get_json(&path).await?;
            match status.status {
                RenderState::Completed | RenderState::Failed => return Ok(status),
                RenderState::Queued | RenderState::Rendering => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ExecutorError::Timeout {
                    elapsed_secs: secs_since(job_started_at),
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[async_trait]
impl Executor for VideoExecutor {
    async fn execute(&self, job: &Job) -> Result<ExecutionOutput, ExecutorError> {
        config_object(&job.job_config)?;
        let deadline = Instant::now() + render_budget(job, Utc::now());

        let render_id = self.submit(job).await?;
        tracing::info!(job_id = job.id, render_id = %render_id, "Render submitted");

        let status = self
            .wait_for_render(&render_id, deadline, job.started_at)
            .await?;

        if status.status == RenderState::Failed {
            return Err(ExecutorError::ProviderFailed(
                status
                    .error
                    .unwrap_or_else(|| format!("render {render_id} failed")),
            ));
        }

        Ok(ExecutionOutput {
            result_data: status
                .result_data
                .unwrap_or_else(|| serde_json::json!({ "render_id": render_id })),
            cost: status.cost,
            output_urls: status.output_urls,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn render_job(config: serde_json::Value) -> Job {
        let now = Utc::now();
        Job {
            id: 7,
            priority: 1,
            job_type: "video.render".to_string(),
            title: "Launch teaser".to_string(),
            job_config: config,
            provider: "video-engine".to_string(),
            status_id: 2,
            schedule_after: now,
            deadline: None,
            estimated_duration_secs: 1,
            started_at: Some(now),
            completed_at: None,
            actual_duration_secs: None,
            result_data: None,
            cost: None,
            output_urls: None,
            error_message: None,
            error_details: None,
            source_recommendation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn executor() -> VideoExecutor {
        let client = ProviderClient::new("http://127.0.0.1:1", Duration::from_secs(2))
            .unwrap()
            .with_retry_delay(Duration::from_millis(10));
        VideoExecutor::new(client, Duration::from_millis(10))
    }

    #[test]
    fn render_status_parses_terminal_states() {
        let status: RenderStatus = serde_json::from_value(serde_json::json!({
            "status": "completed",
            "cost": 1.5,
            "output_urls": {"video": "https://cdn.example/a.mp4"},
        }))
        .unwrap();
        assert_eq!(status.status, RenderState::Completed);
        assert_eq!(status.cost, Some(1.5));
        assert_eq!(status.output_urls.len(), 1);

        let status: RenderStatus =
            serde_json::from_value(serde_json::json!({"status": "failed", "error": "codec"}))
                .unwrap();
        assert_eq!(status.status, RenderState::Failed);
        assert_eq!(status.error.as_deref(), Some("codec"));
    }

    #[test]
    fn budget_counts_from_started_at_and_leaves_a_margin() {
        let now = Utc::now();
        let mut job = render_job(serde_json::json!({}));
        job.estimated_duration_secs = 60;

        job.started_at = Some(now);
        assert_eq!(render_budget(&job, now), Duration::from_secs(119));

        job.started_at = Some(now - chrono::Duration::seconds(100));
        assert_eq!(render_budget(&job, now), Duration::from_secs(19));

        job.started_at = Some(now - chrono::Duration::milliseconds(119_500));
        assert_eq!(render_budget(&job, now), Duration::ZERO);

        job.started_at = Some(now - chrono::Duration::seconds(200));
        assert_eq!(render_budget(&job, now), Duration::ZERO);
    }

    #[tokio::test]
    async fn non_object_config_is_rejected_before_any_request() {
        let err = executor()
            .execute(&render_job(serde_json::json!("scene 1")))
            .await
            .unwrap_err();
        assert_matches!(err, ExecutorError::InvalidConfig(_));
    }

    #[tokio::test]
    async fn unreachable_engine_is_a_request_error() {
        let err = executor()
            .execute(&render_job(serde_json::json!({"scenes": 3})))
            .await
            .unwrap_err();
        assert_matches!(err, ExecutorError::Request(_));
    }
}
