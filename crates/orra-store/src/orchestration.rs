//! Orchestration record.
//!
//! The orchestration is the unit the rest of the control plane revolves
//! around: a submitted `{action, input}` request, its compiled [`TaskGraph`]
//! once the graph compiler has run, and the terminal result or error once
//! execution finishes.

use chrono::{DateTime, Utc};
use orra_graph::TaskGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of an orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    /// The graph compiler could not produce an executable plan; `error`
    /// explains why. Never scheduled.
    NotActionable,
    /// Submitted and compiled, not yet picked up by the scheduler.
    Pending,
    /// The scheduler is actively dispatching tasks.
    Processing,
    /// Every node succeeded.
    Completed,
    /// A node failed without remaining retries.
    Failed,
    /// Explicitly aborted by the client.
    Aborted,
    /// The compensation engine is unwinding succeeded nodes.
    Compensating,
    /// Compensation finished (possibly with per-node failures recorded on
    /// individual nodes; the aggregate outcome is `CompensationFailed` on
    /// the orchestration only if at least one compensation exhausted retries).
    Compensated,
    /// At least one compensation exhausted its retry budget.
    CompensationFailed,
}

/// A submitted orchestration request and its execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orchestration {
    pub id: String,
    pub project_id: String,
    pub action: String,
    pub input: Value,
    pub status: OrchestrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<TaskGraph>,
    /// The orchestration's final output, resolved from the graph's `output`
    /// binding once every node has succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Orchestration {
    pub(crate) fn new(id: String, project_id: String, action: String, input: Value, now: DateTime<Utc>) -> Self {
        Self {
            id,
            project_id,
            action,
            input,
            status: OrchestrationStatus::Pending,
            graph: None,
            results: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this orchestration has reached a status it will never leave
    /// on its own (no more scheduler or compensation activity expected).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrchestrationStatus::NotActionable
                | OrchestrationStatus::Completed
                | OrchestrationStatus::Compensated
                | OrchestrationStatus::CompensationFailed
        )
    }
}
