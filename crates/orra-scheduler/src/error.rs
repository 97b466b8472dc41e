//! Scheduler error types.

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("orchestration not found: {id}")]
    OrchestrationNotFound { id: String },

    #[error("orchestration {id} has no compiled graph attached")]
    NoGraph { id: String },

    #[error("internal scheduler error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<orra_store::StoreError> for SchedulerError {
    fn from(err: orra_store::StoreError) -> Self {
        match err {
            orra_store::StoreError::NotFound { id } => SchedulerError::OrchestrationNotFound { id },
            other => SchedulerError::Internal(other.to_string()),
        }
    }
}
