//! REST API route handlers.
//!
//! Provides the project/service registration surface, orchestration
//! submission and listing, and the inspection view.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use orra_planner::{PlanRequest, ServiceCatalogEntry};
use orra_registry::{CompensationCapability, ServiceType};
use orra_store::OrchestrationStatus;

use crate::auth::AuthenticatedProject;
use crate::error::{ApiError, Result};
use crate::inspection::{InspectionView, OrchestrationSummary};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /register/project
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ProjectResponse {
    pub id: String,
    pub api_key: String,
}

/// Register a new project. The only route that does not require an API key.
pub async fn register_project(State(state): State<Arc<AppState>>) -> Json<ProjectResponse> {
    let project = state.projects.register();
    Json(ProjectResponse {
        id: project.id,
        api_key: project.api_key,
    })
}

// ---------------------------------------------------------------------------
// POST /apikeys
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}

/// Mint an additional API key for the authenticated project. The minted
/// key is equally privileged to the primary.
pub async fn mint_api_key(
    State(state): State<Arc<AppState>>,
    AuthenticatedProject(project): AuthenticatedProject,
) -> Result<Json<ApiKeyResponse>> {
    let api_key = state.projects.mint_api_key(&project.id)?;
    Ok(Json(ApiKeyResponse { api_key }))
}

// ---------------------------------------------------------------------------
// POST /webhooks
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AddWebhookRequest {
    pub url: String,
}

pub async fn add_webhook(
    State(state): State<Arc<AppState>>,
    AuthenticatedProject(project): AuthenticatedProject,
    Json(body): Json<AddWebhookRequest>,
) -> Result<StatusCode> {
    state.projects.add_webhook(&project.id, &body.url)?;
    Ok(StatusCode::CREATED)
}

// ---------------------------------------------------------------------------
// POST /register/service, POST /register/agent
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RegisterServiceRequest {
    pub name: String,
    pub input_schema: Value,
    pub output_schema: Value,
    #[serde(default)]
    pub compensation: CompensationCapability,
}

#[derive(Serialize)]
pub struct RegisterServiceResponse {
    pub id: String,
    pub version: u64,
}

async fn register_kind(
    state: &AppState,
    project_id: &str,
    kind: ServiceType,
    body: RegisterServiceRequest,
) -> RegisterServiceResponse {
    let service = state.services.register(
        project_id,
        &body.name,
        kind,
        body.input_schema,
        body.output_schema,
        body.compensation,
    );
    RegisterServiceResponse {
        id: service.id,
        version: service.version,
    }
}

pub async fn register_service(
    State(state): State<Arc<AppState>>,
    AuthenticatedProject(project): AuthenticatedProject,
    Json(body): Json<RegisterServiceRequest>,
) -> Json<RegisterServiceResponse> {
    Json(register_kind(&state, &project.id, ServiceType::Service, body).await)
}

pub async fn register_agent(
    State(state): State<Arc<AppState>>,
    AuthenticatedProject(project): AuthenticatedProject,
    Json(body): Json<RegisterServiceRequest>,
) -> Json<RegisterServiceResponse> {
    Json(register_kind(&state, &project.id, ServiceType::Agent, body).await)
}

// ---------------------------------------------------------------------------
// POST /orchestrations
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SubmitOrchestrationRequest {
    pub action: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Serialize)]
pub struct SubmitOrchestrationResponse {
    pub id: String,
    pub status: OrchestrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Submit an orchestration: plan it against the oracle, compile the draft
/// into an executable graph, and either hand it to the scheduler or mark it
/// `NotActionable`.
///
/// A planner or compiler failure is never a 5xx — it is reported as 422
/// with the orchestration already recorded `NotActionable`, per the
/// propagation rule.
pub async fn submit_orchestration(
    State(state): State<Arc<AppState>>,
    AuthenticatedProject(project): AuthenticatedProject,
    Json(body): Json<SubmitOrchestrationRequest>,
) -> Result<(StatusCode, Json<SubmitOrchestrationResponse>)> {
    let id = orra_registry::ids::new_orchestration_id();
    state.store.create(id.clone(), &project.id, &body.action, body.input.clone());

    let catalogue: Vec<ServiceCatalogEntry> = state
        .services
        .list_for_project(&project.id)
        .into_iter()
        .map(|s| ServiceCatalogEntry {
            name: s.name,
            kind: match s.kind {
                ServiceType::Service => "service".to_string(),
                ServiceType::Agent => "agent".to_string(),
            },
            input_schema: s.input_schema,
            output_schema: s.output_schema,
        })
        .collect();

    let request = PlanRequest {
        action: body.action.clone(),
        project_services: catalogue,
        input: body.input.clone(),
    };

    let draft = match state.planner.plan(&request).await {
        Ok(draft) => draft,
        Err(e) => {
            state.store.mark_not_actionable(&id, e.to_string())?;
            return Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(SubmitOrchestrationResponse {
                    id,
                    status: OrchestrationStatus::NotActionable,
                    error: Some(e.to_string()),
                }),
            ));
        }
    };

    let graph = match orra_graph::compile(&draft, &project.id, &state.services) {
        Ok(graph) => graph,
        Err(e) => {
            state.store.mark_not_actionable(&id, e.to_string())?;
            return Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(SubmitOrchestrationResponse {
                    id,
                    status: OrchestrationStatus::NotActionable,
                    error: Some(e.to_string()),
                }),
            ));
        }
    };

    state.store.attach_graph(&id, graph)?;
    state.scheduler.spawn(id.clone());

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitOrchestrationResponse {
            id,
            status: OrchestrationStatus::Processing,
            error: None,
        }),
    ))
}

// ---------------------------------------------------------------------------
// GET /orchestrations
// ---------------------------------------------------------------------------

pub async fn list_orchestrations(
    State(state): State<Arc<AppState>>,
    AuthenticatedProject(project): AuthenticatedProject,
) -> Json<Vec<OrchestrationSummary>> {
    let list = state
        .store
        .list_for_project(&project.id)
        .into_iter()
        .map(OrchestrationSummary::from)
        .collect();
    Json(list)
}

// ---------------------------------------------------------------------------
// POST /orchestrations/{id}/abort
// ---------------------------------------------------------------------------

/// Abort an orchestration. If it had already reached `Completed`, the
/// scheduler's driver loop has long since exited and will never re-fire a
/// terminal transition, so compensation is kicked off directly here rather
/// than relying on the scheduler/compensation listener pairing that handles
/// the in-flight `Failed`/`Aborted` case.
pub async fn abort_orchestration(
    State(state): State<Arc<AppState>>,
    AuthenticatedProject(project): AuthenticatedProject,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let orchestration = state.store.get(&id)?;
    if orchestration.project_id != project.id {
        return Err(ApiError::Registry(orra_registry::RegistryError::ProjectNotFound {
            project_id: project.id,
        }));
    }
    let prior_status = state.store.abort(&id)?;
    if prior_status == OrchestrationStatus::Completed {
        state.compensation.spawn(id);
    }
    Ok(StatusCode::ACCEPTED)
}

// ---------------------------------------------------------------------------
// GET /orchestrations/inspections/{id}
// ---------------------------------------------------------------------------

pub async fn inspect_orchestration(
    State(state): State<Arc<AppState>>,
    AuthenticatedProject(project): AuthenticatedProject,
    Path(id): Path<String>,
) -> Result<Json<InspectionView>> {
    let orchestration = state.store.get(&id)?;
    if orchestration.project_id != project.id {
        return Err(ApiError::Registry(orra_registry::RegistryError::ProjectNotFound {
            project_id: project.id,
        }));
    }

    Ok(Json(InspectionView::build(&orchestration, &state.channel)))
}

// ---------------------------------------------------------------------------
// GET /status
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
