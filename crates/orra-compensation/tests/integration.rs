//! End-to-end abort/compensation test: a task still in flight when `Abort`
//! is called is left to finish (and counted as failed, never compensated),
//! while nodes that had already succeeded are unwound in reverse
//! topological order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use orra_channel::{ChannelManager, InboundMessage, OutboundEnvelope, ResultStatus};
use orra_compensation::CompensationEngine;
use orra_graph::compile;
use orra_planner::{DraftGraph, DraftTask};
use orra_registry::{CompensationCapability, ServiceRegistry, ServiceType};
use orra_scheduler::{DispatchPool, RetryPolicy, Scheduler};
use orra_store::{OrchestrationStatus, OrchestrationStore};

const TEST_TIMEOUT: Duration = Duration::from_secs(2);

fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        base: Duration::from_millis(1),
        factor: 2.0,
        cap: Duration::from_millis(5),
        max_attempts: 3,
    }
}

async fn wait_for_status(store: &OrchestrationStore, id: &str, want: OrchestrationStatus) {
    timeout(TEST_TIMEOUT, async {
        loop {
            if store.get(id).unwrap().status == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("orchestration never reached {want:?}"));
}

/// Abort mid-execution: `A` has already succeeded, `B` is still dispatched.
/// Aborting must leave `B` to finish (it reports failed, not compensated)
/// while `A` gets its compensation request dispatched in reverse order.
#[tokio::test]
async fn abort_compensates_only_already_succeeded_nodes() {
    let services = ServiceRegistry::new();
    let project_id = "proj_1";
    let svc_a = services.register(
        project_id,
        "A",
        ServiceType::Service,
        json!({"type": "object"}),
        json!({"type": "object", "properties": {"doc": {"type": "string"}}}),
        CompensationCapability { supported: true, input_schema: None },
    );
    let svc_b = services.register(
        project_id,
        "B",
        ServiceType::Service,
        json!({"type": "object", "properties": {"doc": {"type": "string"}}}),
        json!({"type": "object", "properties": {"summary": {"type": "string"}}}),
        CompensationCapability::default(),
    );

    let draft = DraftGraph {
        tasks: vec![
            DraftTask { key: "A".into(), service_name: "A".into(), inputs: HashMap::new() },
            DraftTask {
                key: "B".into(),
                service_name: "B".into(),
                inputs: HashMap::from([("doc".to_string(), json!("$tasks.A.doc"))]),
            },
        ],
        output: "$tasks.B.summary".into(),
    };
    let graph = compile(&draft, project_id, &services).expect("draft should compile");

    let store = OrchestrationStore::new();
    store.create("orch_1".into(), project_id, "summarise", json!({}));
    store.attach_graph("orch_1", graph).unwrap();

    let channel = Arc::new(ChannelManager::new());
    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
    channel.connect(project_id, &svc_a.id, tx_a);
    channel.connect(project_id, &svc_b.id, tx_b);

    let scheduler = Scheduler::with_config(channel.clone(), store.clone(), DispatchPool::new(8), fast_retry_policy());
    let compensation = CompensationEngine::with_retry_policy(
        channel.clone(),
        store.clone(),
        services.clone(),
        fast_retry_policy(),
    );
    compensation.spawn_listener(scheduler.subscribe_terminal());

    scheduler.spawn("orch_1".to_string());

    let a_request = match timeout(TEST_TIMEOUT, rx_a.recv()).await.unwrap().unwrap() {
        OutboundEnvelope::TaskRequest { id, .. } => id,
        other => panic!("expected a task_request, got {other:?}"),
    };
    channel.handle_message(
        &svc_a.id,
        InboundMessage::TaskResult {
            id: a_request,
            execution_id: "orch_1".into(),
            status: ResultStatus::Completed,
            output: Some(json!({"doc": "d"})),
            error: None,
        },
    );

    // B is dispatched once A succeeds; leave it unanswered and abort while
    // it's still in flight.
    let _b_request = timeout(TEST_TIMEOUT, rx_b.recv())
        .await
        .expect("B should have been dispatched")
        .expect("channel open");

    store.abort("orch_1").unwrap();

    wait_for_status(&store, "orch_1", OrchestrationStatus::Compensating).await;

    // A's compensation request follows, since it's the only node that had
    // actually succeeded.
    let comp_request = match timeout(TEST_TIMEOUT, rx_a.recv()).await.unwrap().unwrap() {
        OutboundEnvelope::CompensationRequest { id, original_task_id, .. } => {
            assert_eq!(original_task_id, "task0");
            id
        }
        other => panic!("expected a compensation_request, got {other:?}"),
    };

    // B must never receive a compensation request — it never succeeded.
    assert!(rx_b.try_recv().is_err(), "B should not be compensated");

    channel.handle_message(
        &svc_a.id,
        InboundMessage::CompensationResult {
            id: comp_request,
            execution_id: "orch_1".into(),
            status: ResultStatus::Completed,
            error: None,
        },
    );

    wait_for_status(&store, "orch_1", OrchestrationStatus::Compensated).await;

    let final_state = store.get("orch_1").unwrap();
    let graph = final_state.graph.unwrap();
    let node_b = graph.nodes.iter().find(|n| n.key == "B").unwrap();
    assert_eq!(node_b.status, orra_graph::NodeStatus::Failed);
    let node_a = graph.nodes.iter().find(|n| n.key == "A").unwrap();
    assert_eq!(node_a.status, orra_graph::NodeStatus::Compensated);
}
