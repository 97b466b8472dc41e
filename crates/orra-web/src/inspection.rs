//! Inspection view.
//!
//! Read-only, denormalised projections of orchestration and task-graph state
//! for the `/orchestrations` list and `/orchestrations/inspections/{id}`
//! detail endpoints. Generalised from a flat status/summary response shape
//! from a flat status struct to a per-node breakdown over the compiled
//! graph plus live worker-channel connection state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use orra_channel::ChannelManager;
use orra_graph::NodeStatus;
use orra_store::{Orchestration, OrchestrationStatus};

/// One row of the `/orchestrations` list.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationSummary {
    pub id: String,
    pub action: String,
    pub status: OrchestrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Orchestration> for OrchestrationSummary {
    fn from(o: Orchestration) -> Self {
        Self {
            id: o.id,
            action: o.action,
            status: o.status,
            created_at: o.created_at,
            updated_at: o.updated_at,
        }
    }
}

/// Per-node detail within an inspection view.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInspection {
    pub task_id: String,
    pub key: String,
    pub service_id: String,
    pub service_name: String,
    pub status: NodeStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the node's service currently has a live, healthy worker
    /// channel session.
    pub service_connected: bool,
}

/// Full per-orchestration inspection view.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionView {
    pub id: String,
    pub project_id: String,
    pub action: String,
    pub input: Value,
    pub status: OrchestrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub nodes: Vec<NodeInspection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InspectionView {
    #[must_use]
    pub fn build(orchestration: &Orchestration, channel: &Arc<ChannelManager>) -> Self {
        let nodes = orchestration
            .graph
            .as_ref()
            .map(|g| {
                g.nodes
                    .iter()
                    .map(|n| NodeInspection {
                        task_id: n.task_id.clone(),
                        key: n.key.clone(),
                        service_id: n.service_id.clone(),
                        service_name: n.service_name.clone(),
                        status: n.status,
                        attempts: n.attempts,
                        result: n.result.clone(),
                        error: n.error.clone(),
                        service_connected: channel.is_healthy(&n.service_id),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: orchestration.id.clone(),
            project_id: orchestration.project_id.clone(),
            action: orchestration.action.clone(),
            input: orchestration.input.clone(),
            status: orchestration.status,
            results: orchestration.results.clone(),
            error: orchestration.error.clone(),
            nodes,
            created_at: orchestration.created_at,
            updated_at: orchestration.updated_at,
        }
    }
}
