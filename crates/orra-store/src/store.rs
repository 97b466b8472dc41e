//! In-memory orchestration store.
//!
//! `DashMap`-backed concurrent store, purely in-memory — no on-disk
//! persistence layer.
//!
//! Cross-component state mutation goes through owned stores rather than
//! nested locks: callers read/mutate one orchestration at a time through
//! [`OrchestrationStore::with_orchestration`] / `_mut`, which take and
//! release the per-key `DashMap` guard for the duration of the closure —
//! never held across an `.await`.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use orra_graph::TaskGraph;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::orchestration::{Orchestration, OrchestrationStatus};

/// Concurrent, per-process orchestration store. Cheaply cloneable.
#[derive(Clone)]
pub struct OrchestrationStore {
    inner: Arc<Inner>,
}

struct Inner {
    orchestrations: DashMap<String, Orchestration>,
    /// Per-orchestration cancellation token for `Abort`.
    cancel_tokens: DashMap<String, CancellationToken>,
}

impl OrchestrationStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestrations: DashMap::new(),
                cancel_tokens: DashMap::new(),
            }),
        }
    }

    /// Record a freshly submitted orchestration, prior to compilation.
    pub fn create(&self, id: String, project_id: &str, action: &str, input: Value) -> Orchestration {
        let orchestration = Orchestration::new(
            id.clone(),
            project_id.to_string(),
            action.to_string(),
            input,
            Utc::now(),
        );

        self.inner.cancel_tokens.insert(id.clone(), CancellationToken::new());
        self.inner.orchestrations.insert(id, orchestration.clone());
        orchestration
    }

    /// Snapshot a single orchestration (clone), for the inspection view or
    /// for callers that only need to read.
    pub fn get(&self, id: &str) -> Result<Orchestration> {
        self.inner
            .orchestrations
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    /// List every orchestration belonging to a project, newest first.
    pub fn list_for_project(&self, project_id: &str) -> Vec<Orchestration> {
        let mut out: Vec<Orchestration> = self
            .inner
            .orchestrations
            .iter()
            .filter(|e| e.value().project_id == project_id)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Mutate an orchestration in place, bumping `updated_at`. The closure
    /// runs under the shard's lock and must not block or await.
    pub fn with_orchestration_mut<F, R>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Orchestration) -> R,
    {
        let mut entry = self
            .inner
            .orchestrations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let result = f(&mut entry);
        entry.updated_at = Utc::now();
        Ok(result)
    }

    /// Mark an orchestration `NotActionable` with the given explanation.
    /// Never scheduled.
    pub fn mark_not_actionable(&self, id: &str, error: impl Into<String>) -> Result<()> {
        self.with_orchestration_mut(id, |o| {
            o.status = OrchestrationStatus::NotActionable;
            o.error = Some(error.into());
        })
    }

    /// Attach a compiled graph and move the orchestration to `Processing`.
    pub fn attach_graph(&self, id: &str, graph: TaskGraph) -> Result<()> {
        self.with_orchestration_mut(id, |o| {
            o.graph = Some(graph);
            o.status = OrchestrationStatus::Processing;
        })
    }

    /// Transition status directly. Used by the scheduler/compensation engine
    /// for terminal transitions (`Completed`, `Failed`, `Compensating`, ...).
    pub fn set_status(&self, id: &str, status: OrchestrationStatus) -> Result<()> {
        self.with_orchestration_mut(id, |o| o.status = status)
    }

    /// Record the final resolved output and transition to `Completed`.
    pub fn complete(&self, id: &str, results: Value) -> Result<()> {
        self.with_orchestration_mut(id, |o| {
            o.results = Some(results);
            o.status = OrchestrationStatus::Completed;
        })
    }

    /// Record a terminal failure.
    pub fn fail(&self, id: &str, error: impl Into<String>) -> Result<()> {
        self.with_orchestration_mut(id, |o| {
            o.error = Some(error.into());
            o.status = OrchestrationStatus::Failed;
        })
    }

    /// The cancellation token for an orchestration, used by the scheduler to
    /// observe aborts and by the HTTP layer to trigger them.
    pub fn cancel_token(&self, id: &str) -> Result<CancellationToken> {
        self.inner
            .cancel_tokens
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    /// Cancel an orchestration: flips its token (waking every waiter) and
    /// transitions it to `Aborted` if it was still in flight or had already
    /// completed. Returns the prior status, since the caller needs to know
    /// whether a `Completed` orchestration just became abortable — that
    /// path never goes through the scheduler's own terminal transition, so
    /// the caller is responsible for kicking off compensation itself.
    /// Any other status (already `Aborted`, mid-compensation, or one of the
    /// other terminal statuses) is left untouched.
    pub fn abort(&self, id: &str) -> Result<OrchestrationStatus> {
        let token = self.cancel_token(id)?;
        token.cancel();

        self.with_orchestration_mut(id, |o| {
            let prior = o.status;
            if matches!(
                prior,
                OrchestrationStatus::Pending
                    | OrchestrationStatus::Processing
                    | OrchestrationStatus::Completed
            ) {
                o.status = OrchestrationStatus::Aborted;
            }
            prior
        })
    }
}

impl Default for OrchestrationStore {
    fn default() -> Self {
        Self::new()
    }
}
