//! Orchestration store error types.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("orchestration not found: {id}")]
    NotFound { id: String },

    /// Attempted a transition the state machine doesn't allow, e.g.
    /// completing an orchestration that still has un-succeeded nodes.
    #[error("invalid orchestration transition for {id}: {reason}")]
    InvalidTransition { id: String, reason: String },

    #[error("internal store error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
