//! Compensation engine.
//!
//! Shares the same master-loop-plus-spawned-worker shape as
//! `orra_scheduler::Scheduler`, generalised from a forward readiness scan
//! to a reverse-topological walk over previously-`Succeeded` nodes, and
//! reusing [`orra_scheduler::RetryPolicy`] rather than duplicating the
//! backoff policy dispatch already uses.
//!
//! On `Failed` or explicit `Aborted`, walks `Succeeded` nodes in reverse
//! topological order. A node without a declared compensation capability is
//! marked `Compensated` with no dispatch. A node with one is sent a
//! `compensation_request` and retried per [`RetryPolicy`]; exhaustion marks
//! it `CompensationFailed` but does not stop the walk — the aggregate
//! outcome is `CompensationFailed` on the whole orchestration only if at
//! least one node's compensation exhausted retries.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use orra_channel::{ChannelEvent, ChannelManager, FailureKind, OutboundEnvelope, ResultStatus};
use orra_graph::NodeStatus;
use orra_registry::ServiceRegistry;
use orra_scheduler::{RetryPolicy, TerminalEvent};
use orra_store::{OrchestrationStatus, OrchestrationStore};

use crate::error::Result;

#[derive(Clone)]
pub struct CompensationEngine {
    channel: Arc<ChannelManager>,
    store: OrchestrationStore,
    services: ServiceRegistry,
    retry_policy: RetryPolicy,
    terminal_tx: broadcast::Sender<TerminalEvent>,
}

impl CompensationEngine {
    #[must_use]
    pub fn new(channel: Arc<ChannelManager>, store: OrchestrationStore, services: ServiceRegistry) -> Self {
        Self::with_retry_policy(channel, store, services, RetryPolicy::dispatch_default())
    }

    #[must_use]
    pub fn with_retry_policy(
        channel: Arc<ChannelManager>,
        store: OrchestrationStore,
        services: ServiceRegistry,
        retry_policy: RetryPolicy,
    ) -> Self {
        let (terminal_tx, _rx) = broadcast::channel(256);
        Self {
            channel,
            store,
            services,
            retry_policy,
            terminal_tx,
        }
    }

    /// Subscribe to compensation outcomes (`Compensated`/`CompensationFailed`),
    /// e.g. for webhook delivery once a failed/aborted orchestration finishes
    /// unwinding.
    pub fn subscribe_terminal(&self) -> broadcast::Receiver<TerminalEvent> {
        self.terminal_tx.subscribe()
    }

    /// Listen for terminal orchestration transitions and trigger compensation
    /// for the ones that need it (`Failed`, `Aborted`). Runs until the
    /// sender side of `terminal_rx` is dropped; intended to be spawned once
    /// for the process lifetime alongside the scheduler.
    pub fn spawn_listener(&self, mut terminal_rx: broadcast::Receiver<TerminalEvent>) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                match terminal_rx.recv().await {
                    Ok(event) => {
                        if matches!(
                            event.status,
                            OrchestrationStatus::Failed | OrchestrationStatus::Aborted
                        ) {
                            engine.spawn(event.orchestration_id);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Begin compensating an orchestration. Spawns and returns immediately;
    /// a panic inside is caught by Tokio's task boundary and only logged,
    /// matching the scheduler's per-orchestration isolation.
    pub fn spawn(&self, orchestration_id: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.compensate(&orchestration_id).await {
                tracing::error!(orchestration_id = %orchestration_id, %err, "compensation driver exited with an error");
            }
        });
    }

    async fn compensate(&self, orchestration_id: &str) -> Result<()> {
        self.store.set_status(orchestration_id, OrchestrationStatus::Compensating)?;

        let orchestration = self.store.get(orchestration_id)?;
        let project_id = orchestration.project_id.clone();
        let graph = orchestration
            .graph
            .as_ref()
            .ok_or_else(|| crate::error::CompensationError::NoGraph {
                id: orchestration_id.to_string(),
            })?
            .clone();

        // Nodes are stored in topological order (task ids are allocated that
        // way at compile time); reverse it for unwind order.
        let succeeded: Vec<usize> = graph
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.status == NodeStatus::Succeeded)
            .map(|(i, _)| i)
            .rev()
            .collect();

        let mut any_failed = false;

        for node_index in succeeded {
            let (task_id, service_id, output, key) = {
                let node = &graph.nodes[node_index];
                (
                    node.task_id.clone(),
                    node.service_id.clone(),
                    node.result.clone().unwrap_or(Value::Null),
                    node.key.clone(),
                )
            };

            let service = self.services.get(&project_id, &service_id);
            let supported = service.map(|s| s.compensation.supported).unwrap_or(false);

            let outcome = if supported {
                self.compensate_node(orchestration_id, &task_id, &service_id, output).await
            } else {
                NodeOutcome::NoOp
            };

            let status = match outcome {
                NodeOutcome::NoOp | NodeOutcome::Compensated => NodeStatus::Compensated,
                NodeOutcome::Failed => {
                    any_failed = true;
                    NodeStatus::CompensationFailed
                }
            };

            self.store.with_orchestration_mut(orchestration_id, |o| {
                if let Some(g) = o.graph.as_mut() {
                    g.nodes[node_index].status = status;
                }
            })?;

            tracing::info!(orchestration_id = %orchestration_id, task_id = %task_id, key = %key, status = ?status, "compensation step complete");
        }

        let final_status = if any_failed {
            OrchestrationStatus::CompensationFailed
        } else {
            OrchestrationStatus::Compensated
        };
        self.store.set_status(orchestration_id, final_status)?;
        tracing::info!(orchestration_id = %orchestration_id, status = ?final_status, "compensation finished");
        let _ = self.terminal_tx.send(TerminalEvent {
            orchestration_id: orchestration_id.to_string(),
            status: final_status,
        });

        Ok(())
    }

    /// Dispatch a `compensation_request` for one node and drive it to a
    /// terminal outcome with the same retry/backoff policy as task dispatch.
    async fn compensate_node(
        &self,
        orchestration_id: &str,
        original_task_id: &str,
        service_id: &str,
        original_output: Value,
    ) -> NodeOutcome {
        let comp_id = format!("comp_{original_task_id}");
        let idempotency_key = orra_scheduler::idempotency::derive(
            orchestration_id,
            &comp_id,
            &original_output,
        );

        let mut attempt: u32 = 0;
        let cancel = CancellationToken::new(); // compensation itself is never aborted mid-flight.

        loop {
            let mut events = self.channel.subscribe();

            let envelope = OutboundEnvelope::CompensationRequest {
                id: comp_id.clone(),
                idempotency_key: idempotency_key.clone(),
                execution_id: orchestration_id.to_string(),
                service_id: service_id.to_string(),
                original_task_id: original_task_id.to_string(),
                original_output: original_output.clone(),
            };

            match self.channel.dispatch(service_id, envelope) {
                Ok(()) => {}
                Err(_) => {
                    attempt += 1;
                    if !self.retry_policy.should_retry(attempt) {
                        return NodeOutcome::Failed;
                    }
                    tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
                    continue;
                }
            }

            match await_compensation_result(&mut events, &comp_id, orchestration_id, &cancel).await {
                CompensationAwaitOutcome::Completed => return NodeOutcome::Compensated,
                CompensationAwaitOutcome::Permanent => return NodeOutcome::Failed,
                CompensationAwaitOutcome::Transient | CompensationAwaitOutcome::Lost => {
                    attempt += 1;
                    if !self.retry_policy.should_retry(attempt) {
                        return NodeOutcome::Failed;
                    }
                    tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}

enum NodeOutcome {
    NoOp,
    Compensated,
    Failed,
}

enum CompensationAwaitOutcome {
    Completed,
    Permanent,
    Transient,
    Lost,
}

async fn await_compensation_result(
    events: &mut broadcast::Receiver<ChannelEvent>,
    comp_id: &str,
    orchestration_id: &str,
    cancel: &CancellationToken,
) -> CompensationAwaitOutcome {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return CompensationAwaitOutcome::Lost,
            event = events.recv() => {
                let Ok(event) = event else { return CompensationAwaitOutcome::Lost };
                match event {
                    ChannelEvent::CompensationResult { id, execution_id, status, error, .. } => {
                        if id != comp_id || execution_id != orchestration_id {
                            continue;
                        }
                        return match status {
                            ResultStatus::Completed => CompensationAwaitOutcome::Completed,
                            ResultStatus::Failed => {
                                let transient = error
                                    .map(|e| e.kind == FailureKind::Transient)
                                    .unwrap_or(true);
                                if transient {
                                    CompensationAwaitOutcome::Transient
                                } else {
                                    CompensationAwaitOutcome::Permanent
                                }
                            }
                        };
                    }
                    ChannelEvent::SessionLost { pending_task_ids, .. } => {
                        if pending_task_ids.iter().any(|id| id == comp_id) {
                            return CompensationAwaitOutcome::Lost;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orra_graph::{Binding, Node, TaskGraph};
    use orra_registry::{CompensationCapability, ServiceType};
    use serde_json::json;
    use std::collections::HashMap;

    fn succeeded_node(task_id: &str, key: &str, service_id: &str, topo_index: usize, output: Value) -> Node {
        Node {
            task_id: task_id.to_string(),
            key: key.to_string(),
            service_id: service_id.to_string(),
            service_name: key.to_string(),
            input_bindings: HashMap::new(),
            topo_index,
            predecessors: Vec::new(),
            status: NodeStatus::Succeeded,
            attempts: 1,
            result: Some(output),
            error: None,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn nodes_without_compensation_capability_are_marked_compensated_with_no_dispatch() {
        let channel = Arc::new(ChannelManager::new());
        let store = OrchestrationStore::new();
        let services = ServiceRegistry::new();

        services.register(
            "proj_1",
            "A",
            ServiceType::Service,
            json!({}),
            json!({}),
            CompensationCapability::default(),
        );

        store.create("orch_1".into(), "proj_1", "do_thing", json!({}));
        let graph = TaskGraph {
            nodes: vec![succeeded_node("task0", "A", "svc_a", 0, json!({"doc": "x"}))],
            output: Binding::Literal(Value::Null),
        };
        store.attach_graph("orch_1", graph).unwrap();
        // service ids in the registry don't need to match for this path since
        // `get` will fail and `supported` defaults to false either way; make
        // it resolve properly for realism.
        let svc = services.get_by_name("proj_1", "A").unwrap();
        store
            .with_orchestration_mut("orch_1", |o| {
                o.graph.as_mut().unwrap().nodes[0].service_id = svc.id.clone();
            })
            .unwrap();

        let engine = CompensationEngine::new(channel, store.clone(), services);
        engine.compensate("orch_1").await.unwrap();

        let final_state = store.get("orch_1").unwrap();
        assert_eq!(final_state.status, OrchestrationStatus::Compensated);
        assert_eq!(
            final_state.graph.unwrap().nodes[0].status,
            NodeStatus::Compensated
        );
    }

    #[tokio::test]
    async fn compensation_dispatches_for_capable_service_and_honors_result() {
        let channel = Arc::new(ChannelManager::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        channel.connect("proj_1", "svc_a", tx);

        let store = OrchestrationStore::new();
        let services = ServiceRegistry::new();
        let svc = services.register(
            "proj_1",
            "A",
            ServiceType::Service,
            json!({}),
            json!({}),
            CompensationCapability { supported: true, input_schema: None },
        );

        store.create("orch_1".into(), "proj_1", "do_thing", json!({}));
        let mut node = succeeded_node("task0", "A", &svc.id, 0, json!({"doc": "x"}));
        node.service_id = svc.id.clone();
        let graph = TaskGraph {
            nodes: vec![node],
            output: Binding::Literal(Value::Null),
        };
        store.attach_graph("orch_1", graph).unwrap();

        let engine = CompensationEngine::new(channel.clone(), store.clone(), services);

        let handle = tokio::spawn({
            let engine = engine.clone();
            async move { engine.compensate("orch_1").await }
        });

        let envelope = rx.recv().await.expect("compensation request dispatched");
        assert!(matches!(envelope, OutboundEnvelope::CompensationRequest { .. }));

        channel.handle_message(
            "svc_a",
            orra_channel::InboundMessage::CompensationResult {
                id: "comp_task0".into(),
                execution_id: "orch_1".into(),
                status: ResultStatus::Completed,
                error: None,
            },
        );

        handle.await.unwrap().unwrap();

        let final_state = store.get("orch_1").unwrap();
        assert_eq!(final_state.status, OrchestrationStatus::Compensated);
    }
}
