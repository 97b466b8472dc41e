//! Worker-channel wire protocol.
//!
//! Every message is a JSON object tagged by `type`. Outbound envelopes are
//! what the control plane writes to a connected service; inbound messages
//! are what it reads back. The two are kept as separate enums because the
//! set of message kinds each side originates is disjoint except for
//! `ping`/`pong`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default cap on a single inbound message, per spec: 10 KiB unless the
/// deployment overrides it.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024;

/// Why a task or compensation failed, as reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// A worker-reported error accompanying a failed result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome tag on an inbound `task_result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
}

/// Messages the control plane writes to a connected worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    TaskRequest {
        id: String,
        #[serde(rename = "idempotencyKey")]
        idempotency_key: String,
        #[serde(rename = "executionID")]
        execution_id: String,
        #[serde(rename = "serviceID")]
        service_id: String,
        input: Value,
    },
    CompensationRequest {
        id: String,
        #[serde(rename = "idempotencyKey")]
        idempotency_key: String,
        #[serde(rename = "executionID")]
        execution_id: String,
        #[serde(rename = "serviceID")]
        service_id: String,
        #[serde(rename = "originalTaskID")]
        original_task_id: String,
        #[serde(rename = "originalOutput")]
        original_output: Value,
    },
    Ping,
}

impl OutboundEnvelope {
    /// The task or compensation id this envelope dispatches, if any — used
    /// by the channel manager to track in-flight work per session.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            OutboundEnvelope::TaskRequest { id, .. } => Some(id),
            OutboundEnvelope::CompensationRequest { id, .. } => Some(id),
            OutboundEnvelope::Ping => None,
        }
    }
}

/// Messages a connected worker writes back to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    TaskResult {
        id: String,
        #[serde(rename = "executionID")]
        execution_id: String,
        status: ResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
    },
    CompensationResult {
        id: String,
        #[serde(rename = "executionID")]
        execution_id: String,
        status: ResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
    },
    Ping,
    Pong,
    HealthUpdate {
        status: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_request_round_trips() {
        let env = OutboundEnvelope::TaskRequest {
            id: "task0".into(),
            idempotency_key: "idem-1".into(),
            execution_id: "orch_1".into(),
            service_id: "svc_1".into(),
            input: json!({"url": "u"}),
        };
        let s = serde_json::to_string(&env).unwrap();
        assert!(s.contains("\"type\":\"task_request\""));
        assert_eq!(env.task_id(), Some("task0"));
    }

    #[test]
    fn task_result_parses_from_wire_shape() {
        let raw = json!({
            "type": "task_result",
            "id": "task0",
            "executionID": "orch_1",
            "status": "completed",
            "output": {"doc": "hi"}
        });
        let msg: InboundMessage = serde_json::from_value(raw).unwrap();
        match msg {
            InboundMessage::TaskResult { id, status, output, .. } => {
                assert_eq!(id, "task0");
                assert_eq!(status, ResultStatus::Completed);
                assert_eq!(output.unwrap(), json!({"doc": "hi"}));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn failed_result_carries_failure_kind() {
        let raw = json!({
            "type": "task_result",
            "id": "task0",
            "executionID": "orch_1",
            "status": "failed",
            "error": {"kind": "transient", "message": "timeout"}
        });
        let msg: InboundMessage = serde_json::from_value(raw).unwrap();
        match msg {
            InboundMessage::TaskResult { error: Some(e), .. } => {
                assert_eq!(e.kind, FailureKind::Transient);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
