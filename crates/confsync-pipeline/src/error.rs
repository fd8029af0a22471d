//! Pipeline errors

use confsync_store::StoreError;

use crate::stage::TransitionError;

/// Coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Deployment id unknown
    #[error("deployment '{0}' not found")]
    NotFound(String),

    /// Stage does not accept the event
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Object store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Deployment spec is unusable
    #[error("invalid deployment: {0}")]
    Invalid(String),
}
