//! HTTP error mapping.
//!
//! Converts each crate's `thiserror` error enum into the status code
//! The error kind taxonomy maps to HTTP status: `Validation`/`NotActionable` → 4xx,
//! `Unauthorized` → 401, `NotFound` → 404, `Internal` → 500. Planner/compiler
//! failures never reach this layer as errors at all — the orchestration
//! submission handler catches them and reports `NotActionable` in the 202/422
//! response body instead of a 5xx.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] orra_registry::RegistryError),

    #[error(transparent)]
    Store(#[from] orra_store::StoreError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Registry(orra_registry::RegistryError::InvalidApiKey) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ApiError::Registry(orra_registry::RegistryError::ServiceNotInProject { .. }) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ApiError::Registry(orra_registry::RegistryError::ProjectNotFound { .. })
            | ApiError::Registry(orra_registry::RegistryError::ServiceNotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Registry(orra_registry::RegistryError::InvalidWebhookUrl { .. }) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Registry(orra_registry::RegistryError::Internal(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::Store(orra_store::StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
