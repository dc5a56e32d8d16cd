//! Pluggable job executors.
//!
//! Defines [`Executor`], the capability every job-type handler implements,
//! along with [`ExecutionOutput`] and [`ExecutorError`]. Handlers are looked
//! up by job type through the [`ExecutorRegistry`]; the dispatcher never
//! inspects `job_config` itself.

pub mod http;
pub mod image;
pub mod registry;
pub mod social;
pub mod video;

use std::collections::BTreeMap;

use async_trait::async_trait;
use cadence_db::models::job::{Job, JobCompletion};
use serde::Deserialize;

pub use image::ImageExecutor;
pub use registry::ExecutorRegistry;
pub use social::SocialPostExecutor;
pub use video::VideoExecutor;

/// Successful result of one execution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionOutput {
    #[serde(default = "empty_object")]
    pub result_data: serde_json::Value,
    #[serde(default)]
    pub cost: Option<f64>,
    /// Produced artifacts, e.g. `{"video": "https://..."}`.
    #[serde(default)]
    pub output_urls: BTreeMap<String, String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl ExecutionOutput {
    pub fn new(result_data: serde_json::Value) -> Self {
        Self {
            result_data,
            ..Default::default()
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_output_url(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.output_urls.insert(name.into(), url.into());
        self
    }
}

impl From<ExecutionOutput> for JobCompletion {
    fn from(output: ExecutionOutput) -> Self {
        JobCompletion {
            result_data: output.result_data,
            cost: output.cost,
            output_urls: output.output_urls,
        }
    }
}

/// Errors an execution can end with. Each resolves the job to `failed` with
/// the error's `Display` text as the message.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The job's `job_config` does not match what the executor expects.
    #[error("Invalid job config: {0}")]
    InvalidConfig(String),

    /// No executor is registered for the job type.
    #[error("No executor registered for job type '{0}'")]
    Unsupported(String),

    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("Provider error ({status}): {body}")]
    Provider { status: u16, body: String },

    /// The provider accepted the work but reported it failed.
    #[error("Provider reported failure: {0}")]
    ProviderFailed(String),

    /// The executor gave up waiting for the provider.
    #[error("Timed out after {elapsed_secs}s waiting for provider")]
    Timeout { elapsed_secs: u64 },

    /// The executor task panicked.
    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutorError {
    /// Short machine-readable kind, stored in `error_details`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::Unsupported(_) => "unsupported",
            Self::Request(_) => "request",
            Self::Provider { .. } => "provider",
            Self::ProviderFailed(_) => "provider_failed",
            Self::Timeout { .. } => "timeout",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// A handler for one job type or family.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Perform the job's work. May run for minutes.
    async fn execute(&self, job: &Job) -> Result<ExecutionOutput, ExecutorError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
