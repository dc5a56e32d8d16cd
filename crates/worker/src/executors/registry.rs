//! Job type -> executor lookup.
//!
//! An exact job type registration wins over a family registration, so a
//! specialised handler (e.g. `video.lipsync`) can sit beside a generic
//! `video.*` handler.

use std::collections::HashMap;
use std::sync::Arc;

use cadence_core::job_type::{parse_job_type, JobFamily};
use cadence_db::models::job::Job;

use super::{ExecutionOutput, Executor, ExecutorError};

#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    exact: HashMap<String, Arc<dyn Executor>>,
    families: HashMap<JobFamily, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one exact job type.
    pub fn register(&mut self, job_type: impl Into<String>, executor: Arc<dyn Executor>) {
        self.exact.insert(job_type.into(), executor);
    }

    /// Register a handler for every job type in a family.
    pub fn register_family(&mut self, family: JobFamily, executor: Arc<dyn Executor>) {
        self.families.insert(family, executor);
    }

    /// Builder form of [`register_family`](Self::register_family).
    pub fn with_family(mut self, family: JobFamily, executor: Arc<dyn Executor>) -> Self {
        self.register_family(family, executor);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_job_type(mut self, job_type: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.register(job_type, executor);
        self
    }

    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn Executor>> {
        if let Some(executor) = self.exact.get(job_type) {
            return Some(Arc::clone(executor));
        }
        let family = parse_job_type(job_type).ok()?;
        self.families.get(&family).cloned()
    }

    pub fn supports(&self, job_type: &str) -> bool {
        self.resolve(job_type).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.families.is_empty()
    }

    /// Registered families, for start-up logging.
    pub fn families(&self) -> Vec<JobFamily> {
        let mut families: Vec<JobFamily> = self.families.keys().copied().collect();
        families.sort_by_key(|f| f.prefix());
        families
    }

    /// Run the job on its executor.
    pub async fn execute(&self, job: &Job) -> Result<ExecutionOutput, ExecutorError> {
        let executor = self
            .resolve(&job.job_type)
            .ok_or_else(|| ExecutorError::Unsupported(job.job_type.clone()))?;
        executor.execute(job).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl Executor for Fixed {
        async fn execute(&self, _job: &Job) -> Result<ExecutionOutput, ExecutorError> {
            Ok(ExecutionOutput::new(serde_json::json!({ "handler": self.0 })))
        }
    }

    fn job(job_type: &str) -> Job {
        let now = Utc::now();
        Job {
            id: 1,
            priority: 1,
            job_type: job_type.to_string(),
            title: "t".to_string(),
            job_config: serde_json::json!({}),
            provider: "video".to_string(),
            status_id: 2,
            schedule_after: now,
            deadline: None,
            estimated_duration_secs: 10,
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

    #[tokio::test]
    async fn exact_registration_beats_family() {
        let registry = ExecutorRegistry::new()
            .with_family(JobFamily::Video, Arc::new(Fixed("family")))
            .with_job_type("video.lipsync", Arc::new(Fixed("exact")));

        let exact = registry.execute(&job("video.lipsync")).await.unwrap();
        assert_eq!(exact.result_data["handler"], "exact");

        let family = registry.execute(&job("video.render")).await.unwrap();
        assert_eq!(family.result_data["handler"], "family");
    }

    #[tokio::test]
    async fn unknown_job_type_is_unsupported() {
        let registry = ExecutorRegistry::new().with_family(JobFamily::Video, Arc::new(Fixed("v")));
        assert!(!registry.supports("social.post"));
        assert!(!registry.supports("not-a-type"));
        let err = registry.execute(&job("social.post")).await.unwrap_err();
        assert_matches!(err, ExecutorError::Unsupported(t) if t == "social.post");
    }

    #[test]
    fn families_are_listed_in_stable_order() {
        let registry = ExecutorRegistry::new()
            .with_family(JobFamily::Video, Arc::new(Fixed("v")))
            .with_family(JobFamily::Image, Arc::new(Fixed("i")));
        assert_eq!(registry.families(), vec![JobFamily::Image, JobFamily::Video]);
        assert!(!registry.is_empty());
        assert!(ExecutorRegistry::new().is_empty());
    }
}
