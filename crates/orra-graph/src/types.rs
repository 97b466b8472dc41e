//! Task graph types.
//!
//! The compiled, frozen representation of an orchestration's execution plan:
//! an arena of [`Node`]s indexed by small integer position, plus per-node
//! input bindings referencing earlier nodes' outputs or the orchestration
//! input.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a task's input field value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Binding {
    /// A literal JSON value baked into the plan.
    Literal(Value),
    /// `$tasks.<key>.<field>` — another task's output field.
    TaskOutput { task_key: String, field: String },
    /// `$input.<field>` — a field of the orchestration's input payload.
    Input { field: String },
}

impl Binding {
    /// Parse a draft value into a binding. Reference strings take the form
    /// `$tasks.<key>.<field>` or `$input.<field>`; anything else (including
    /// a plain string that happens not to match that shape) is a literal.
    pub fn parse(value: &Value) -> Self {
        if let Value::String(s) = value {
            if let Some(rest) = s.strip_prefix("$tasks.") {
                if let Some((task_key, field)) = rest.split_once('.') {
                    return Binding::TaskOutput {
                        task_key: task_key.to_string(),
                        field: field.to_string(),
                    };
                }
            } else if let Some(field) = s.strip_prefix("$input.") {
                return Binding::Input {
                    field: field.to_string(),
                };
            }
        }
        Binding::Literal(value.clone())
    }

    /// The draft-level reference string this binding was parsed from, if it
    /// is in fact a reference (used for error messages).
    pub fn reference_string(&self) -> Option<String> {
        match self {
            Binding::TaskOutput { task_key, field } => Some(format!("$tasks.{task_key}.{field}")),
            Binding::Input { field } => Some(format!("$input.{field}")),
            Binding::Literal(_) => None,
        }
    }
}

/// Per-task execution status within a compiled graph's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Dispatched,
    Succeeded,
    Failed,
    Skipped,
    Compensating,
    Compensated,
    CompensationFailed,
}

/// One node (task) of a compiled [`TaskGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier allocated in topological order (`task0`, `task1`, ...).
    pub task_id: String,
    /// The planner-supplied key this node was compiled from (`"A"`, `"B"`, ...).
    pub key: String,
    pub service_id: String,
    pub service_name: String,
    /// Target input field name -> where its value comes from.
    pub input_bindings: HashMap<String, Binding>,
    /// Position in the frozen topological order; used to break dispatch-queue
    /// ties (FIFO readiness order, ties broken by topological index then
    /// task id).
    pub topo_index: usize,
    /// Task ids of every predecessor this node's bindings depend on.
    pub predecessors: Vec<String>,
    pub status: NodeStatus,
    pub attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Stable across retries for the lifetime of the task.
    pub idempotency_key: Option<String>,
}

/// A compiled, frozen, acyclic task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    pub nodes: Vec<Node>,
    /// Reference resolving the orchestration's overall output.
    pub output: Binding,
}

impl TaskGraph {
    /// Look up a node's position by its planner key.
    #[must_use]
    pub fn index_of_key(&self, key: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.key == key)
    }

    /// Look up a node's position by its stable task id.
    #[must_use]
    pub fn index_of_task_id(&self, task_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.task_id == task_id)
    }

    /// Every node currently `Ready`.
    pub fn ready_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.status == NodeStatus::Ready)
    }

    /// Whether every node has reached `Succeeded`.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.nodes.iter().all(|n| n.status == NodeStatus::Succeeded)
    }

    /// Resolve a binding against this graph's current node results and the
    /// orchestration's input payload. Used both to render a task's dispatch
    /// input and to compute the orchestration's final output.
    ///
    /// Returns `None` if the binding references a node that hasn't produced
    /// a result yet, or a field that result doesn't have.
    #[must_use]
    pub fn resolve(&self, binding: &Binding, orchestration_input: &Value) -> Option<Value> {
        match binding {
            Binding::Literal(v) => Some(v.clone()),
            Binding::Input { field } => orchestration_input.get(field).cloned(),
            Binding::TaskOutput { task_key, field } => {
                let node = &self.nodes[self.index_of_task_id(task_key)?];
                node.result.as_ref()?.get(field).cloned()
            }
        }
    }

    /// Render a node's full input object by resolving every binding.
    /// `None` if any binding fails to resolve (a predecessor hasn't produced
    /// the referenced field, or the orchestration input lacks it).
    #[must_use]
    pub fn render_input(&self, node_index: usize, orchestration_input: &Value) -> Option<Value> {
        let node = &self.nodes[node_index];
        let mut object = serde_json::Map::with_capacity(node.input_bindings.len());
        for (field, binding) in &node.input_bindings {
            object.insert(field.clone(), self.resolve(binding, orchestration_input)?);
        }
        Some(Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(task_id: &str, key: &str, bindings: HashMap<String, Binding>, topo_index: usize) -> Node {
        Node {
            task_id: task_id.to_string(),
            key: key.to_string(),
            service_id: "svc_1".to_string(),
            service_name: "A".to_string(),
            input_bindings: bindings,
            topo_index,
            predecessors: Vec::new(),
            status: NodeStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn render_input_resolves_literal_input_and_task_refs() {
        let mut a = node("task0", "A", HashMap::new(), 0);
        a.result = Some(json!({"doc": "hello"}));

        let b = node(
            "task1",
            "B",
            HashMap::from([
                ("doc".to_string(), Binding::TaskOutput { task_key: "task0".to_string(), field: "doc".to_string() }),
                ("lang".to_string(), Binding::Input { field: "lang".to_string() }),
                ("mode".to_string(), Binding::Literal(json!("fast"))),
            ]),
            1,
        );

        let graph = TaskGraph { nodes: vec![a, b], output: Binding::Literal(Value::Null) };
        let rendered = graph.render_input(1, &json!({"lang": "en"})).unwrap();

        assert_eq!(rendered["doc"], "hello");
        assert_eq!(rendered["lang"], "en");
        assert_eq!(rendered["mode"], "fast");
    }

    #[test]
    fn render_input_is_none_when_predecessor_has_no_result_yet() {
        let a = node("task0", "A", HashMap::new(), 0);
        let b = node(
            "task1",
            "B",
            HashMap::from([("doc".to_string(), Binding::TaskOutput { task_key: "task0".to_string(), field: "doc".to_string() })]),
            1,
        );

        let graph = TaskGraph { nodes: vec![a, b], output: Binding::Literal(Value::Null) };
        assert!(graph.render_input(1, &json!({})).is_none());
    }
}
