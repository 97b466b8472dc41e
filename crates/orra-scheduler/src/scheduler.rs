//! Per-orchestration dispatch driver.
//!
//! A master loop that evaluates readiness and hands ready work to spawned
//! tasks, collecting their outcomes over a channel rather than polling: one
//! node-driver task per graph node, backed off with [`RetryPolicy`]'s full
//! jitter.
//!
//! Each orchestration is modelled as an independent task with its own
//! cancellation token; [`Scheduler::spawn`] fires a supervised tokio task
//! per orchestration and returns immediately rather than blocking on it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

use orra_channel::{ChannelEvent, ChannelManager, FailureKind, OutboundEnvelope, ResultStatus};
use orra_graph::{NodeStatus, TaskGraph};
use orra_store::{OrchestrationStatus, OrchestrationStore};

use crate::idempotency;
use crate::pool::DispatchPool;
use crate::retry::RetryPolicy;

/// Default per-task dispatch timeout: how long a node waits for a result
/// once a request has actually gone out over the wire before the wait is
/// treated as a transient failure and retried.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Emitted once an orchestration reaches a terminal status, for the webhook
/// and compensation engines to subscribe to.
#[derive(Debug, Clone)]
pub struct TerminalEvent {
    pub orchestration_id: String,
    pub status: OrchestrationStatus,
}

#[derive(Clone)]
pub struct Scheduler {
    channel: Arc<ChannelManager>,
    store: OrchestrationStore,
    pool: DispatchPool,
    retry_policy: RetryPolicy,
    task_timeout: Duration,
    terminal_tx: broadcast::Sender<TerminalEvent>,
}

impl Scheduler {
    #[must_use]
    pub fn new(channel: Arc<ChannelManager>, store: OrchestrationStore) -> Self {
        Self::with_config(channel, store, DispatchPool::default(), RetryPolicy::dispatch_default())
    }

    #[must_use]
    pub fn with_config(
        channel: Arc<ChannelManager>,
        store: OrchestrationStore,
        pool: DispatchPool,
        retry_policy: RetryPolicy,
    ) -> Self {
        let (terminal_tx, _rx) = broadcast::channel(256);
        Self {
            channel,
            store,
            pool,
            retry_policy,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            terminal_tx,
        }
    }

    /// Override the per-task dispatch timeout, e.g. for a deployment that
    /// wants a different default than [`DEFAULT_TASK_TIMEOUT`].
    #[must_use]
    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    /// Subscribe to terminal orchestration transitions (`Completed`,
    /// `Failed`, ...). Webhook delivery and the compensation engine each
    /// hold their own subscription.
    pub fn subscribe_terminal(&self) -> broadcast::Receiver<TerminalEvent> {
        self.terminal_tx.subscribe()
    }

    /// Begin driving a `Processing` orchestration to completion. Spawns and
    /// returns immediately; a panic inside the driver is caught by Tokio's
    /// task boundary and only logged, never propagated to other
    /// orchestrations.
    pub fn spawn(&self, orchestration_id: String) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(err) = scheduler.drive(&orchestration_id).await {
                tracing::error!(orchestration_id = %orchestration_id, %err, "orchestration driver exited with an error");
            }
        });
    }

    async fn drive(&self, orchestration_id: &str) -> crate::error::Result<()> {
        let cancel = self.store.cancel_token(orchestration_id)?;
        let (wake_tx, mut wake_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        loop {
            let terminal = self.store.with_orchestration_mut(orchestration_id, |o| {
                let graph = o
                    .graph
                    .as_mut()
                    .expect("a Processing orchestration always has a compiled graph attached");

                let aborting = o.status == OrchestrationStatus::Aborted;
                let ready = evaluate_pass(graph, aborting);
                (ready, graph_is_terminal(graph), aborting)
            })?;

            let (ready, graph_terminal, aborting) = terminal;

            if !aborting {
                for node_index in ready {
                    self.dispatch_node(orchestration_id, node_index, cancel.clone(), wake_tx.clone());
                }
            }

            if graph_terminal {
                break;
            }

            // `cancel` firing is observed through `o.status == Aborted` at the
            // top of the next pass, not raced against here — racing it would
            // busy-loop once cancelled, since a fired `CancellationToken`
            // resolves immediately on every poll. Only a node outcome (or an
            // abort that also unblocks a `wait_for_healthy`/backoff sleep
            // inside a node driver, which then reports through `wake_tx`)
            // can change the picture.
            let _ = wake_rx.recv().await;
        }

        self.finalize(orchestration_id)
    }

    fn dispatch_node(
        &self,
        orchestration_id: &str,
        node_index: usize,
        cancel: CancellationToken,
        wake_tx: tokio::sync::mpsc::UnboundedSender<()>,
    ) {
        let Ok((task_id, service_id, idempotency_key, input)) =
            self.store.with_orchestration_mut(orchestration_id, |o| {
                let graph = o.graph.as_mut().expect("graph attached");
                let input = graph.render_input(node_index, &o.input).unwrap_or(Value::Null);
                let node = &mut graph.nodes[node_index];
                let idempotency_key = idempotency::derive(orchestration_id, &node.task_id, &input);
                node.idempotency_key = Some(idempotency_key.clone());
                (node.task_id.clone(), node.service_id.clone(), idempotency_key, input)
            })
        else {
            return;
        };

        let channel = self.channel.clone();
        let store = self.store.clone();
        let retry_policy = self.retry_policy;
        let task_timeout = self.task_timeout;
        let orchestration_id = orchestration_id.to_string();
        let semaphore = self.pool.semaphore();

        tokio::spawn(async move {
            let outcome = run_node(
                channel,
                store.clone(),
                semaphore,
                retry_policy,
                task_timeout,
                cancel,
                &orchestration_id,
                &task_id,
                &service_id,
                &idempotency_key,
                input,
            )
            .await;

            let _ = store.with_orchestration_mut(&orchestration_id, |o| {
                let graph = o.graph.as_mut().expect("graph attached");
                let idx = graph.index_of_task_id(&task_id).expect("node exists");
                let node = &mut graph.nodes[idx];
                node.attempts += 1;
                match outcome {
                    NodeOutcome::Succeeded(output) => {
                        node.status = NodeStatus::Succeeded;
                        node.result = Some(output);
                    }
                    NodeOutcome::Failed(reason) => {
                        node.status = NodeStatus::Failed;
                        node.error = Some(reason);
                    }
                }
            });

            let _ = wake_tx.send(());
        });
    }

    fn finalize(&self, orchestration_id: &str) -> crate::error::Result<()> {
        let (status, results) = self.store.with_orchestration_mut(orchestration_id, |o| {
            if o.status == OrchestrationStatus::Aborted {
                return (OrchestrationStatus::Aborted, None);
            }
            let graph = o.graph.as_ref().expect("graph attached");
            if graph.all_succeeded() {
                let resolved = graph.resolve(&graph.output, &o.input);
                (OrchestrationStatus::Completed, resolved)
            } else {
                (OrchestrationStatus::Failed, None)
            }
        })?;

        match (status, results) {
            (OrchestrationStatus::Completed, Some(output)) => {
                self.store.complete(orchestration_id, output)?;
            }
            (OrchestrationStatus::Completed, None) => {
                self.store
                    .fail(orchestration_id, "orchestration output reference did not resolve")?;
            }
            (OrchestrationStatus::Aborted, _) => {}
            _ => {
                self.store
                    .fail(orchestration_id, "one or more tasks failed without remaining retries")?;
            }
        }

        let final_status = self.store.get(orchestration_id)?.status;
        tracing::info!(orchestration_id = %orchestration_id, status = ?final_status, "orchestration reached a terminal state");
        let _ = self.terminal_tx.send(TerminalEvent {
            orchestration_id: orchestration_id.to_string(),
            status: final_status,
        });

        Ok(())
    }
}

/// Single forward pass over the graph (nodes are in topological order, so a
/// predecessor always precedes its dependents): promotes `Pending` nodes
/// whose predecessors all `Succeeded` and whose service is currently
/// healthy to `Ready`, and cascades `Skipped` to nodes downstream of a
/// `Failed`/`Skipped` predecessor. Returns the indices newly marked `Ready`.
///
/// When `aborting`, every non-terminal node is marked `Skipped` instead —
/// in-flight (`Dispatched`) nodes are left alone to finish: their results
/// only update local state and never trigger successors.
fn evaluate_pass(graph: &mut TaskGraph, aborting: bool) -> Vec<usize> {
    let mut ready = Vec::new();

    for i in 0..graph.nodes.len() {
        let status = graph.nodes[i].status;
        if !matches!(status, NodeStatus::Pending | NodeStatus::Ready) {
            continue;
        }

        if aborting {
            graph.nodes[i].status = NodeStatus::Skipped;
            continue;
        }

        let blocked = graph.nodes[i].predecessors.iter().any(|p| {
            let idx = graph.index_of_task_id(p).expect("predecessor exists");
            matches!(graph.nodes[idx].status, NodeStatus::Failed | NodeStatus::Skipped)
        });
        if blocked {
            graph.nodes[i].status = NodeStatus::Skipped;
            continue;
        }

        let all_predecessors_succeeded = graph.nodes[i].predecessors.iter().all(|p| {
            let idx = graph.index_of_task_id(p).expect("predecessor exists");
            graph.nodes[idx].status == NodeStatus::Succeeded
        });

        if all_predecessors_succeeded && status == NodeStatus::Pending {
            graph.nodes[i].status = NodeStatus::Ready;
            ready.push(i);
        }
    }

    ready
}

fn graph_is_terminal(graph: &TaskGraph) -> bool {
    graph.nodes.iter().all(|n| {
        matches!(
            n.status,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
        )
    })
}

enum NodeOutcome {
    Succeeded(Value),
    Failed(String),
}

/// Drives a single node to a terminal outcome: health-gated dispatch with
/// full-jitter retry on transient failure. A dispatch pool permit is held
/// only from the moment health is confirmed through to that attempt's
/// result (or timeout), never across the health wait itself, so a node
/// stuck behind an unhealthy service can't starve the pool for every other
/// orchestration. The node's status only flips to `Dispatched` once
/// `channel.dispatch()` has actually put a request on the wire.
#[allow(clippy::too_many_arguments)]
async fn run_node(
    channel: Arc<ChannelManager>,
    store: OrchestrationStore,
    semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    task_timeout: Duration,
    cancel: CancellationToken,
    orchestration_id: &str,
    task_id: &str,
    service_id: &str,
    idempotency_key: &str,
    input: Value,
) -> NodeOutcome {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return NodeOutcome::Failed("orchestration aborted".to_string());
        }

        if !wait_for_healthy(&channel, service_id, &cancel).await {
            return NodeOutcome::Failed("orchestration aborted while waiting for service health".to_string());
        }

        let _permit = semaphore.acquire_owned().await;

        let mut events = channel.subscribe();

        let envelope = OutboundEnvelope::TaskRequest {
            id: task_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            execution_id: orchestration_id.to_string(),
            service_id: service_id.to_string(),
            input: input.clone(),
        };

        match channel.dispatch(service_id, envelope) {
            Ok(()) => {}
            Err(_) => {
                attempt += 1;
                if !retry_policy.should_retry(attempt) {
                    return NodeOutcome::Failed(format!(
                        "dispatch to {service_id} failed after {attempt} attempts"
                    ));
                }
                tokio::time::sleep(retry_policy.delay_for_attempt(attempt)).await;
                continue;
            }
        }

        let _ = store.with_orchestration_mut(orchestration_id, |o| {
            if let Some(graph) = o.graph.as_mut() {
                if let Some(idx) = graph.index_of_task_id(task_id) {
                    graph.nodes[idx].status = NodeStatus::Dispatched;
                }
            }
        });

        let awaited = tokio::time::timeout(
            task_timeout,
            await_result(&mut events, task_id, orchestration_id, &cancel),
        )
        .await
        .unwrap_or_else(|_| {
            AwaitOutcome::Transient(format!("no result from {service_id} within {task_timeout:?}"))
        });

        match awaited {
            AwaitOutcome::Completed(output) => return NodeOutcome::Succeeded(output),
            AwaitOutcome::Permanent(message) => return NodeOutcome::Failed(message),
            AwaitOutcome::Transient(message) | AwaitOutcome::Lost(message) => {
                attempt += 1;
                if !retry_policy.should_retry(attempt) {
                    return NodeOutcome::Failed(message);
                }
                tokio::time::sleep(retry_policy.delay_for_attempt(attempt)).await;
            }
            AwaitOutcome::Aborted => {
                return NodeOutcome::Failed("orchestration aborted".to_string());
            }
        }
    }
}

enum AwaitOutcome {
    Completed(Value),
    Permanent(String),
    Transient(String),
    Lost(String),
    Aborted,
}

async fn await_result(
    events: &mut broadcast::Receiver<ChannelEvent>,
    task_id: &str,
    orchestration_id: &str,
    cancel: &CancellationToken,
) -> AwaitOutcome {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return AwaitOutcome::Aborted,
            event = events.recv() => {
                let Ok(event) = event else { return AwaitOutcome::Lost("channel event stream closed".to_string()) };
                match event {
                    ChannelEvent::TaskResult { id, execution_id, status, output, error } => {
                        if id != task_id || execution_id != orchestration_id {
                            continue;
                        }
                        match status {
                            ResultStatus::Completed => {
                                return AwaitOutcome::Completed(output.unwrap_or(Value::Null));
                            }
                            ResultStatus::Failed => {
                                let message = error
                                    .as_ref()
                                    .map(|e| e.message.clone())
                                    .unwrap_or_else(|| "task failed".to_string());
                                let transient = error
                                    .map(|e| e.kind == FailureKind::Transient)
                                    .unwrap_or(true);
                                return if transient {
                                    AwaitOutcome::Transient(message)
                                } else {
                                    AwaitOutcome::Permanent(message)
                                };
                            }
                        }
                    }
                    ChannelEvent::SessionLost { service_id: _, pending_task_ids } => {
                        if pending_task_ids.iter().any(|id| id == task_id) {
                            return AwaitOutcome::Lost("worker session lost while task was in flight".to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Waits until `service_id` is healthy, or returns `false` if the
/// orchestration is aborted first. Time spent here never counts against a
/// task's retry budget.
async fn wait_for_healthy(channel: &ChannelManager, service_id: &str, cancel: &CancellationToken) -> bool {
    if channel.is_healthy(service_id) {
        return true;
    }

    let mut events = channel.subscribe();
    loop {
        if channel.is_healthy(service_id) {
            return true;
        }
        tokio::select! {
            () = cancel.cancelled() => return false,
            event = events.recv() => {
                match event {
                    Ok(ChannelEvent::HealthChanged { service_id: s, healthy: true }) if s == service_id => return true,
                    Ok(_) => continue,
                    Err(_) => return channel.is_healthy(service_id),
                }
            }
        }
    }
}
