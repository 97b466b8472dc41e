//! Compensation engine error types.

#[derive(Debug, thiserror::Error)]
pub enum CompensationError {
    #[error("orchestration not found: {id}")]
    OrchestrationNotFound { id: String },

    #[error("orchestration {id} has no compiled graph attached")]
    NoGraph { id: String },

    #[error("internal compensation engine error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CompensationError>;

impl From<orra_store::StoreError> for CompensationError {
    fn from(err: orra_store::StoreError) -> Self {
        match err {
            orra_store::StoreError::NotFound { id } => CompensationError::OrchestrationNotFound { id },
            other => CompensationError::Internal(other.to_string()),
        }
    }
}
