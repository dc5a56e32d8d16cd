use cadence_core::error::CoreError;
use cadence_db::StoreError;

/// Errors surfaced by orchestrator operations (enqueue, tick, status).
///
/// Executor and feed failures never appear here: they are resolved into
/// job state or logged inside the execution task.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<validator::ValidationErrors> for OrchestratorError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Core(CoreError::Validation(errors.to_string()))
    }
}
