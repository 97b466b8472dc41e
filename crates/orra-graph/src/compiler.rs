//! Graph compiler.
//!
//! Turns a planner [`DraftGraph`] into a frozen [`TaskGraph`]: resolves
//! service names against the project's [`ServiceRegistry`], allocates stable
//! task ids in topological order, checks reference closure and acyclicity,
//! and structurally type-checks every binding.
//!
//! Generalises a `{{step_N.output}}`-style placeholder substitution into the
//! `$tasks.<key>.<field>` / `$input.<field>` reference grammar, with
//! topological ordering via Kahn's algorithm in place of a purely
//! sequential step list.

use std::collections::{HashMap, HashSet, VecDeque};

use orra_planner::{DraftGraph, DraftTask};
use orra_registry::{ServiceInfo, ServiceRegistry};
use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::types::{Binding, Node, NodeStatus, TaskGraph};

/// Compile a planner draft into a frozen, executable [`TaskGraph`].
pub fn compile(draft: &DraftGraph, project_id: &str, services: &ServiceRegistry) -> Result<TaskGraph> {
    if draft.tasks.is_empty() {
        return Err(GraphError::EmptyGraph);
    }

    let mut by_key: HashMap<&str, &DraftTask> = HashMap::new();
    for task in &draft.tasks {
        if by_key.insert(task.key.as_str(), task).is_some() {
            return Err(GraphError::DuplicateKey {
                key: task.key.clone(),
            });
        }
    }

    // Step 1: resolve service names.
    let mut resolved: HashMap<&str, ServiceInfo> = HashMap::new();
    for task in &draft.tasks {
        let info = services
            .get_by_name(project_id, &task.service_name)
            .map_err(|_| GraphError::UnknownService {
                name: task.service_name.clone(),
            })?;
        resolved.insert(task.key.as_str(), info);
    }

    // Parse every binding up front so later steps work over typed `Binding`s.
    let mut parsed_inputs: HashMap<&str, HashMap<String, Binding>> = HashMap::new();
    for task in &draft.tasks {
        let bindings: HashMap<String, Binding> = task
            .inputs
            .iter()
            .map(|(field, raw)| (field.clone(), Binding::parse(raw)))
            .collect();
        parsed_inputs.insert(task.key.as_str(), bindings);
    }

    // Build the dependency graph: task_key -> set of task_keys it references.
    let mut deps: HashMap<&str, HashSet<&str>> = HashMap::new();
    for task in &draft.tasks {
        let mut d = HashSet::new();
        for binding in parsed_inputs[task.key.as_str()].values() {
            if let Binding::TaskOutput { task_key, .. } = binding {
                if !by_key.contains_key(task_key.as_str()) {
                    return Err(GraphError::DanglingReference {
                        reference: binding.reference_string().unwrap_or_default(),
                    });
                }
                d.insert(task_key.as_str());
            }
        }
        deps.insert(task.key.as_str(), d);
    }

    // The overall output reference must also resolve.
    let output_binding = Binding::parse(&Value::String(draft.output.clone()));
    if let Binding::TaskOutput { task_key, .. } = &output_binding {
        if !by_key.contains_key(task_key.as_str()) {
            return Err(GraphError::DanglingReference {
                reference: output_binding.reference_string().unwrap_or_default(),
            });
        }
    }

    // Step 2 + 3: Kahn's algorithm gives both the topological order and
    // cycle detection in one pass.
    let topo_order = topological_order(&draft.tasks, &deps)?;

    // Step 4: structural schema check on every $tasks.* binding.
    for task in &draft.tasks {
        let consumer = &resolved[task.key.as_str()];
        for (field, binding) in &parsed_inputs[task.key.as_str()] {
            if let Binding::TaskOutput {
                task_key: producer_key,
                field: source_field,
            } = binding
            {
                let producer = &resolved[producer_key.as_str()];
                check_schema_compatible(
                    producer,
                    source_field,
                    consumer,
                    field,
                )
                .map_err(|reason| GraphError::SchemaMismatch {
                    task_key: task.key.clone(),
                    field: field.clone(),
                    reason,
                })?;
            }
        }
    }

    // Step 5: freeze. Allocate stable task ids in topological order.
    let mut key_to_task_id: HashMap<&str, String> = HashMap::new();
    for (i, key) in topo_order.iter().enumerate() {
        key_to_task_id.insert(key, format!("task{i}"));
    }

    let nodes = topo_order
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let task = by_key[key];
            let service = &resolved[key];
            let predecessors = deps[key]
                .iter()
                .map(|dep_key| key_to_task_id[dep_key].clone())
                .collect();

            // Rewrite every `TaskOutput` binding's planner-facing key to the
            // stable task id so the scheduler never has to carry the
            // planner's key vocabulary at dispatch time.
            let input_bindings = parsed_inputs[key]
                .iter()
                .map(|(field, binding)| {
                    let rewritten = match binding {
                        Binding::TaskOutput { task_key, field: source_field } => Binding::TaskOutput {
                            task_key: key_to_task_id[task_key.as_str()].clone(),
                            field: source_field.clone(),
                        },
                        other => other.clone(),
                    };
                    (field.clone(), rewritten)
                })
                .collect();

            Node {
                task_id: key_to_task_id[key].clone(),
                key: (*key).to_string(),
                service_id: service.id.clone(),
                service_name: service.name.clone(),
                input_bindings,
                topo_index: i,
                predecessors,
                status: NodeStatus::Pending,
                attempts: 0,
                result: None,
                error: None,
                idempotency_key: None,
            }
        })
        .collect();

    let output = match output_binding {
        Binding::TaskOutput { task_key, field } => Binding::TaskOutput {
            task_key: key_to_task_id[task_key.as_str()].clone(),
            field,
        },
        other => other,
    };

    Ok(TaskGraph { nodes, output })
}

/// Kahn's algorithm over the draft's key-based dependency graph. Returns the
/// keys in topological order, or [`GraphError::CycleDetected`] if the graph
/// has a cycle (equivalently: not every key could be emitted).
fn topological_order<'a>(
    tasks: &'a [DraftTask],
    deps: &HashMap<&'a str, HashSet<&'a str>>,
) -> Result<Vec<&'a str>> {
    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.key.as_str(), 0)).collect();
    // dependents[k] = keys that depend on k, i.e. the reverse edges Kahn's
    // algorithm walks once k is emitted.
    let mut dependents: HashMap<&str, Vec<&str>> = tasks.iter().map(|t| (t.key.as_str(), Vec::new())).collect();

    for task in tasks {
        let key = task.key.as_str();
        for dep in &deps[key] {
            *in_degree.get_mut(key).expect("key present") += 1;
            dependents.get_mut(dep).expect("dep present").push(key);
        }
    }

    // Preserve the planner's original ordering among ties for determinism.
    let mut queue: VecDeque<&str> = tasks
        .iter()
        .map(|t| t.key.as_str())
        .filter(|k| in_degree[k] == 0)
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(key) = queue.pop_front() {
        order.push(key);
        for dependent in &dependents[key] {
            let degree = in_degree.get_mut(dependent).expect("dependent present");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != tasks.len() {
        return Err(GraphError::CycleDetected);
    }

    Ok(order)
}

/// Structural subtype check: the consumer may accept a superset of optional
/// fields, so compatibility only requires that if both schemas declare a
/// JSON type for the field in question, those types agree. Absent type
/// information on either side is treated as compatible — the planner oracle
/// is trusted to have matched the field names sensibly; this check exists to
/// catch clear mismatches (e.g. a string bound into a number field), not to
/// fully validate JSON Schema.
fn check_schema_compatible(
    producer: &ServiceInfo,
    source_field: &str,
    consumer: &ServiceInfo,
    target_field: &str,
) -> std::result::Result<(), String> {
    let producer_type = field_type(&producer.output_schema, source_field);
    let consumer_type = field_type(&consumer.input_schema, target_field);

    match (producer_type, consumer_type) {
        (Some(p), Some(c)) if p != c => Err(format!(
            "producer field `{source_field}` is `{p}` but consumer field `{target_field}` expects `{c}`"
        )),
        _ => Ok(()),
    }
}

/// Look up `schema.properties.<field>.type` if present.
fn field_type(schema: &Value, field: &str) -> Option<String> {
    schema
        .get("properties")?
        .get(field)?
        .get("type")?
        .as_str()
        .map(str::to_string)
}
