//! Registry error types.
//!
//! All registry subsystems surface errors through [`RegistryError`], which is
//! the single error type returned by every public API in this crate. Each
//! variant carries enough context for callers to decide how to handle the
//! failure without inspecting opaque strings.

/// Unified error type for the project/service registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No project matches the given API key.
    #[error("unauthorized: invalid api key")]
    InvalidApiKey,

    /// The project does not exist.
    #[error("project not found: {project_id}")]
    ProjectNotFound { project_id: String },

    /// The webhook URL failed to parse as an absolute URL.
    #[error("invalid webhook url: {url}")]
    InvalidWebhookUrl { url: String },

    /// The service does not exist within the project.
    #[error("service not found: {name}")]
    ServiceNotFound { name: String },

    /// The service exists but belongs to a different project.
    #[error("service {service_id} does not belong to project {project_id}")]
    ServiceNotInProject {
        service_id: String,
        project_id: String,
    },

    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant. Prefer a typed variant whenever possible.
    #[error("internal registry error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the registry crate.
pub type Result<T> = std::result::Result<T, RegistryError>;
