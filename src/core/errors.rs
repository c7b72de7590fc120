use thiserror::Error;

use crate::providers::types::AllProvidersFailed;

/// Error taxonomy of the processing pipeline. Provider-attempt errors never
/// appear here directly; they are absorbed by the provider chain and surface
/// only as [`PipelineError::AllProvidersFailed`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed caller input. Surfaced immediately, never retried.
    #[error("{0}")]
    Validation(String),

    /// Ownership or existence check failure.
    #[error("{0} not found")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Transition attempted from a disallowed source state, or a
    /// duplicate-Approved guard violation. Underlying state is unchanged.
    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error(transparent)]
    AllProvidersFailed(#[from] AllProvidersFailed),

    /// Blob storage failure. Aborts the owning upload transition.
    #[error("blob storage failure: {0}")]
    Storage(String),

    /// Document rendering failure. Non-retryable; aborts the pipeline.
    #[error("document render failed: {0}")]
    Render(String),

    /// Storage-layer failure. Any in-progress multi-row write is rolled back
    /// in full before this propagates.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl PipelineError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound(format!("{entity} {id}"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict(message.into())
    }
}
