//! Graph compiler error types.
//!
//! Every variant here corresponds to a reason an orchestration is marked
//! `NotActionable` rather than a 5xx-worthy internal failure — the web
//! layer reports these in the 422 response body, never escalates them.

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The planner's draft referenced a service name not registered (or not
    /// registered for this project).
    #[error("unknown service: {name}")]
    UnknownService { name: String },

    /// Two draft tasks used the same `key`.
    #[error("duplicate task key: {key}")]
    DuplicateKey { key: String },

    /// A `$tasks.<key>.<field>` / `$input.<field>` reference didn't resolve
    /// to an earlier task or the orchestration input.
    #[error("dangling reference: {reference}")]
    DanglingReference { reference: String },

    /// The draft's dependency graph is not acyclic.
    #[error("cycle detected in draft graph")]
    CycleDetected,

    /// A binding's source and target schemas are not structurally
    /// compatible.
    #[error("schema mismatch on {task_key}.{field}: {reason}")]
    SchemaMismatch {
        task_key: String,
        field: String,
        reason: String,
    },

    /// The planner returned no tasks at all.
    #[error("draft graph has no tasks")]
    EmptyGraph,

    #[error("internal graph compiler error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
