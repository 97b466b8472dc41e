//! `X-API-Key` authentication extractor.
//!
//! Every route except `/register/project` requires this header. Resolving
//! it to a [`Project`] happens once, at the extractor, so
//! handlers never touch the raw header themselves.

use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;

use orra_registry::Project;

use crate::error::ApiError;
use crate::state::AppState;

pub struct AuthenticatedProject(pub Project);

impl FromRequestParts<Arc<AppState>> for AuthenticatedProject {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let State(state) = State::<Arc<AppState>>::from_request_parts(parts, state)
            .await
            .expect("State extraction is infallible");

        let key = parts
            .headers
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Registry(orra_registry::RegistryError::InvalidApiKey))?;

        let project = state.projects.authenticate(key)?;
        Ok(AuthenticatedProject(project))
    }
}
