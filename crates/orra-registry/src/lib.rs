//! Project and service registry for the Orra control plane.
//!
//! Owns the two pieces of state every other crate needs to resolve tenancy
//! and dispatch targets: which project an API key belongs to, and which
//! services/agents that project has registered.

pub mod error;
pub mod ids;
pub mod project;
pub mod service;

pub use error::{RegistryError, Result};
pub use project::{Project, ProjectRegistry};
pub use service::{CompensationCapability, ServiceInfo, ServiceRegistry, ServiceType};
