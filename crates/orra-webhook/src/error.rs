//! Webhook delivery error types.

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("orchestration not found: {id}")]
    OrchestrationNotFound { id: String },

    #[error("project not found: {project_id}")]
    ProjectNotFound { project_id: String },

    #[error("internal webhook delivery error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WebhookError>;

impl From<orra_store::StoreError> for WebhookError {
    fn from(err: orra_store::StoreError) -> Self {
        match err {
            orra_store::StoreError::NotFound { id } => WebhookError::OrchestrationNotFound { id },
            other => WebhookError::Internal(other.to_string()),
        }
    }
}

impl From<orra_registry::RegistryError> for WebhookError {
    fn from(err: orra_registry::RegistryError) -> Self {
        match err {
            orra_registry::RegistryError::ProjectNotFound { project_id } => {
                WebhookError::ProjectNotFound { project_id }
            }
            other => WebhookError::Internal(other.to_string()),
        }
    }
}
