//! End-to-end scheduler tests.
//!
//! Exercises a real compiled graph, a real [`ChannelManager`], and a real
//! [`Scheduler`] — the only stand-in is the "worker" on the other end of
//! each service's session, played here by reading straight off the `mpsc`
//! sink a connected session hands back, so only the external collaborator
//! (the connected worker) is mocked, not the scheduler itself.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use orra_channel::{ChannelManager, FailureKind, InboundMessage, OutboundEnvelope, ResultStatus, TaskError};
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
        max_attempts: 5,
    }
}

fn schema(props: &[(&str, &str)]) -> Value {
    let properties: serde_json::Map<String, Value> = props
        .iter()
        .map(|(name, ty)| (name.to_string(), json!({"type": ty})))
        .collect();
    json!({"type": "object", "properties": properties})
}

async fn recv_task_request(rx: &mut UnboundedReceiver<OutboundEnvelope>) -> (String, String, Value) {
    match timeout(TEST_TIMEOUT, rx.recv()).await.expect("envelope should arrive") {
        Some(OutboundEnvelope::TaskRequest { id, idempotency_key, input, .. }) => (id, idempotency_key, input),
        other => panic!("expected a task_request, got {other:?}"),
    }
}

async fn wait_for_terminal(store: &OrchestrationStore, id: &str) -> OrchestrationStatus {
    timeout(TEST_TIMEOUT, async {
        loop {
            let status = store.get(id).unwrap().status;
            if !matches!(status, OrchestrationStatus::Pending | OrchestrationStatus::Processing) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("orchestration should reach a terminal status")
}

/// Scenario 1: happy path, two-task chain. `B` must not be dispatched until
/// `A`'s result has been received.
#[tokio::test]
async fn happy_path_two_task_chain() {
    let services = ServiceRegistry::new();
    let project_id = "proj_1";
    let svc_a = services.register(
        project_id,
        "A",
        ServiceType::Service,
        schema(&[]),
        schema(&[("doc", "string")]),
        CompensationCapability::default(),
    );
    let svc_b = services.register(
        project_id,
        "B",
        ServiceType::Service,
        schema(&[("doc", "string")]),
        schema(&[("summary", "string")]),
        CompensationCapability::default(),
    );

    let draft = DraftGraph {
        tasks: vec![
            DraftTask { key: "A".into(), service_name: "A".into(), inputs: HashMap::from([("url".to_string(), json!("$input.url"))]) },
            DraftTask { key: "B".into(), service_name: "B".into(), inputs: HashMap::from([("doc".to_string(), json!("$tasks.A.doc"))]) },
        ],
        output: "$tasks.B.summary".into(),
    };
    let graph = compile(&draft, project_id, &services).expect("draft should compile");

    let store = OrchestrationStore::new();
    store.create("orch_1".into(), project_id, "summarise", json!({"url": "u"}));
    store.attach_graph("orch_1", graph).unwrap();

    let channel = std::sync::Arc::new(ChannelManager::new());
    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
    channel.connect(project_id, &svc_a.id, tx_a);
    channel.connect(project_id, &svc_b.id, tx_b);

    let scheduler = Scheduler::with_config(channel.clone(), store.clone(), DispatchPool::new(8), fast_retry_policy());
    scheduler.spawn("orch_1".to_string());

    let (task_a, _, input_a) = recv_task_request(&mut rx_a).await;
    assert_eq!(input_a["url"], "u");

    // B must not be dispatched before A's result is in.
    assert!(rx_b.try_recv().is_err(), "B dispatched before its predecessor succeeded");

    channel.handle_message(
        &svc_a.id,
        InboundMessage::TaskResult {
            id: task_a,
            execution_id: "orch_1".into(),
            status: ResultStatus::Completed,
            output: Some(json!({"doc": "hello"})),
            error: None,
        },
    );

    let (task_b, _, input_b) = recv_task_request(&mut rx_b).await;
    assert_eq!(input_b["doc"], "hello");

    channel.handle_message(
        &svc_b.id,
        InboundMessage::TaskResult {
            id: task_b,
            execution_id: "orch_1".into(),
            status: ResultStatus::Completed,
            output: Some(json!({"summary": "s"})),
            error: None,
        },
    );

    let status = wait_for_terminal(&store, "orch_1").await;
    assert_eq!(status, OrchestrationStatus::Completed);

    let orchestration = store.get("orch_1").unwrap();
    assert_eq!(orchestration.results, Some(json!({"summary": "s"})));
}

/// Scenario 2: a plan referencing a service not registered for the project
/// never reaches the scheduler — the orchestration is marked `NotActionable`
/// and carries an error mentioning the unknown name.
#[tokio::test]
async fn unknown_service_marks_not_actionable() {
    let services = ServiceRegistry::new();
    let project_id = "proj_1";

    let draft = DraftGraph {
        tasks: vec![DraftTask { key: "A".into(), service_name: "C".into(), inputs: HashMap::new() }],
        output: "$tasks.A.doc".into(),
    };

    let store = OrchestrationStore::new();
    store.create("orch_1".into(), project_id, "summarise", json!({}));

    let err = compile(&draft, project_id, &services).unwrap_err();
    store.mark_not_actionable("orch_1", err.to_string()).unwrap();

    let orchestration = store.get("orch_1").unwrap();
    assert_eq!(orchestration.status, OrchestrationStatus::NotActionable);
    assert!(orchestration.graph.is_none());
    assert!(orchestration.error.unwrap().contains('C'));
}

/// Scenario 3: a service fails transiently twice, then succeeds. Every
/// dispatch must carry the same idempotency key.
#[tokio::test]
async fn transient_failure_retries_with_stable_idempotency_key() {
    let services = ServiceRegistry::new();
    let project_id = "proj_1";
    let svc_a = services.register(
        project_id,
        "A",
        ServiceType::Service,
        schema(&[]),
        schema(&[("doc", "string")]),
        CompensationCapability::default(),
    );

    let draft = DraftGraph {
        tasks: vec![DraftTask { key: "A".into(), service_name: "A".into(), inputs: HashMap::new() }],
        output: "$tasks.A.doc".into(),
    };
    let graph = compile(&draft, project_id, &services).unwrap();

    let store = OrchestrationStore::new();
    store.create("orch_1".into(), project_id, "summarise", json!({}));
    store.attach_graph("orch_1", graph).unwrap();

    let channel = std::sync::Arc::new(ChannelManager::new());
    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
    channel.connect(project_id, &svc_a.id, tx_a);

    let scheduler = Scheduler::with_config(channel.clone(), store.clone(), DispatchPool::new(8), fast_retry_policy());
    scheduler.spawn("orch_1".to_string());

    let mut idempotency_keys = Vec::new();
    for attempt in 0..3 {
        let (task_id, idempotency_key, _) = recv_task_request(&mut rx_a).await;
        idempotency_keys.push(idempotency_key);

        let status = if attempt < 2 { ResultStatus::Failed } else { ResultStatus::Completed };
        let error = if attempt < 2 {
            Some(TaskError { kind: FailureKind::Transient, message: "timeout".into() })
        } else {
            None
        };
        let output = if attempt < 2 { None } else { Some(json!({"doc": "d"})) };

        channel.handle_message(
            &svc_a.id,
            InboundMessage::TaskResult { id: task_id, execution_id: "orch_1".into(), status, output, error },
        );
    }

    let status = wait_for_terminal(&store, "orch_1").await;
    assert_eq!(status, OrchestrationStatus::Completed);
    assert_eq!(idempotency_keys.len(), 3);
    assert!(idempotency_keys.iter().all(|k| k == &idempotency_keys[0]), "idempotency key changed across retries");
}

/// Scenario 4: a task whose target service is unhealthy at readiness time
/// is never dispatched until a subsequent healthy transition is observed.
#[tokio::test]
async fn dispatch_waits_for_unhealthy_service_to_recover() {
    let services = ServiceRegistry::new();
    let project_id = "proj_1";
    let svc_a = services.register(
        project_id,
        "A",
        ServiceType::Service,
        schema(&[]),
        schema(&[("doc", "string")]),
        CompensationCapability::default(),
    );
    let svc_b = services.register(
        project_id,
        "B",
        ServiceType::Service,
        schema(&[("doc", "string")]),
        schema(&[("summary", "string")]),
        CompensationCapability::default(),
    );

    let draft = DraftGraph {
        tasks: vec![
            DraftTask { key: "A".into(), service_name: "A".into(), inputs: HashMap::new() },
            DraftTask { key: "B".into(), service_name: "B".into(), inputs: HashMap::from([("doc".to_string(), json!("$tasks.A.doc"))]) },
        ],
        output: "$tasks.B.summary".into(),
    };
    let graph = compile(&draft, project_id, &services).unwrap();

    let store = OrchestrationStore::new();
    store.create("orch_1".into(), project_id, "summarise", json!({}));
    store.attach_graph("orch_1", graph).unwrap();

    // Tiny ping/health window so B goes unhealthy quickly without anyone
    // answering its pings.
    let channel = std::sync::Arc::new(ChannelManager::with_config(
        Duration::from_millis(10),
        Duration::from_millis(20),
        orra_channel::DEFAULT_MAX_MESSAGE_BYTES,
    ));
    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
    channel.connect(project_id, &svc_a.id, tx_a);
    channel.connect(project_id, &svc_b.id, tx_b);

    // Let B's session time out before the orchestration even starts, while
    // keeping A alive by answering its pings — both sessions share the same
    // tiny health window, so A would time out too without this.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    while channel.is_healthy(&svc_b.id) && tokio::time::Instant::now() < deadline {
        channel.handle_message(&svc_a.id, InboundMessage::Pong);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!channel.is_healthy(&svc_b.id), "B should have gone unhealthy");
    assert!(channel.is_healthy(&svc_a.id), "A should still be healthy");

    let scheduler = Scheduler::with_config(channel.clone(), store.clone(), DispatchPool::new(8), fast_retry_policy());
    scheduler.spawn("orch_1".to_string());

    let (task_a, _, _) = recv_task_request(&mut rx_a).await;
    channel.handle_message(
        &svc_a.id,
        InboundMessage::TaskResult {
            id: task_a,
            execution_id: "orch_1".into(),
            status: ResultStatus::Completed,
            output: Some(json!({"doc": "d"})),
            error: None,
        },
    );

    // B is ready (A succeeded) but its service is still unhealthy: no
    // dispatch should appear yet.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rx_b.try_recv().is_err(), "B dispatched while its service was unhealthy");

    // Recover B and expect the dispatch to follow.
    channel.handle_message(&svc_b.id, InboundMessage::Pong);
    let (task_b, _, _) = recv_task_request(&mut rx_b).await;

    channel.handle_message(
        &svc_b.id,
        InboundMessage::TaskResult {
            id: task_b,
            execution_id: "orch_1".into(),
            status: ResultStatus::Completed,
            output: Some(json!({"summary": "s"})),
            error: None,
        },
    );

    let status = wait_for_terminal(&store, "orch_1").await;
    assert_eq!(status, OrchestrationStatus::Completed);
}

/// Scenario 6: when a new session for `serviceID=X` arrives while the
/// previous one still has a dispatch in flight, the in-flight dispatch is
/// reissued on the new session with the same idempotency key, and the
/// orchestration still sees a single success.
#[tokio::test]
async fn connection_supersession_reissues_in_flight_dispatch() {
    let services = ServiceRegistry::new();
    let project_id = "proj_1";
    let svc_a = services.register(
        project_id,
        "A",
        ServiceType::Service,
        schema(&[]),
        schema(&[("doc", "string")]),
        CompensationCapability::default(),
    );

    let draft = DraftGraph {
        tasks: vec![DraftTask { key: "A".into(), service_name: "A".into(), inputs: HashMap::new() }],
        output: "$tasks.A.doc".into(),
    };
    let graph = compile(&draft, project_id, &services).unwrap();

    let store = OrchestrationStore::new();
    store.create("orch_1".into(), project_id, "summarise", json!({}));
    store.attach_graph("orch_1", graph).unwrap();

    let channel = std::sync::Arc::new(ChannelManager::new());
    let (tx1, mut rx1) = tokio::sync::mpsc::unbounded_channel();
    channel.connect(project_id, &svc_a.id, tx1);

    let scheduler = Scheduler::with_config(channel.clone(), store.clone(), DispatchPool::new(8), fast_retry_policy());
    scheduler.spawn("orch_1".to_string());

    let (task_id, idem_key_1, _) = recv_task_request(&mut rx1).await;

    // A new session for the same service supersedes the first while the
    // task is still in flight.
    let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
    channel.connect(project_id, &svc_a.id, tx2);

    let (_, idem_key_2, _) = recv_task_request(&mut rx2).await;
    assert_eq!(idem_key_1, idem_key_2, "reissued dispatch must keep the same idempotency key");

    // Nothing further should ever arrive on the superseded session.
    assert!(rx1.try_recv().is_err());

    channel.handle_message(
        &svc_a.id,
        InboundMessage::TaskResult {
            id: task_id,
            execution_id: "orch_1".into(),
            status: ResultStatus::Completed,
            output: Some(json!({"doc": "d"})),
            error: None,
        },
    );

    let status = wait_for_terminal(&store, "orch_1").await;
    assert_eq!(status, OrchestrationStatus::Completed);
}
