//! Graph compiler and validator.
//!
//! Normalises a planner draft into a typed, frozen DAG: resolves service
//! names, allocates stable task ids in topological order, checks dependency
//! closure and acyclicity, and structurally type-checks every binding.

pub mod compiler;
pub mod error;
pub mod types;

pub use compiler::compile;
pub use error::{GraphError, Result};
pub use types::{Binding, Node, NodeStatus, TaskGraph};
