//! Idempotency key derivation.
//!
//! `idempotencyKey = hash(orchestrationID, taskID, resolvedInput)` — stable
//! across retries because none of its three inputs change once a task
//! becomes `Ready` (the resolved input is fixed the moment every
//! predecessor has produced its output).

use serde_json::Value;
use sha2::{Digest, Sha256};

#[must_use]
pub fn derive(orchestration_id: &str, task_id: &str, resolved_input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(orchestration_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(task_id.as_bytes());
    hasher.update(b"\0");
    // serde_json's map serialization is insertion-ordered, not key-sorted;
    // canonicalize so the hash doesn't depend on binding iteration order.
    hasher.update(canonical_json(resolved_input).as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", entries.join(","))
        }
        other => other.to_string(),
    }
}
