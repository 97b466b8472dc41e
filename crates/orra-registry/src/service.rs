//! Service registry.
//!
//! A service is anything a plan can dispatch a task to: a deterministic
//! service or an agent. Registration is idempotent by name — re-registering
//! an existing name bumps its schema version rather than creating a
//! duplicate entry, so a service can redeploy with a changed schema without
//! orphaning in-flight orchestrations that reference the old one.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, Result};
use crate::ids;

/// Whether a registered entity is a plain service or an LLM-backed agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Service,
    Agent,
}

/// Declares whether a service knows how to undo its own effects, and if so
/// what input its compensation handler expects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompensationCapability {
    pub supported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// A service or agent reachable over the worker channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub kind: ServiceType,
    pub version: u64,
    pub input_schema: Value,
    pub output_schema: Value,
    #[serde(default)]
    pub compensation: CompensationCapability,
}

/// Concurrent, per-project service registry.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    by_id: DashMap<String, ServiceInfo>,
    /// (project_id, name) -> service_id, so re-registration can be detected.
    by_name: DashMap<(String, String), String>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                by_id: DashMap::new(),
                by_name: DashMap::new(),
            }),
        }
    }

    /// Register a service, or bump the version of an existing one with the
    /// same name within the project.
    pub fn register(
        &self,
        project_id: &str,
        name: &str,
        kind: ServiceType,
        input_schema: Value,
        output_schema: Value,
        compensation: CompensationCapability,
    ) -> ServiceInfo {
        let key = (project_id.to_string(), name.to_string());

        if let Some(existing_id) = self.inner.by_name.get(&key).map(|e| e.value().clone()) {
            let mut entry = self
                .inner
                .by_id
                .get_mut(&existing_id)
                .expect("by_name and by_id must stay in sync");

            entry.version += 1;
            entry.input_schema = input_schema;
            entry.output_schema = output_schema;
            entry.compensation = compensation;

            tracing::info!(
                service_id = %entry.id,
                project_id = %project_id,
                name = %name,
                version = entry.version,
                "service re-registered"
            );

            return entry.clone();
        }

        let service = ServiceInfo {
            id: ids::new_service_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            kind,
            version: 1,
            input_schema,
            output_schema,
            compensation,
        };

        tracing::info!(
            service_id = %service.id,
            project_id = %project_id,
            name = %name,
            kind = ?kind,
            "service registered"
        );

        self.inner.by_name.insert(key, service.id.clone());
        self.inner.by_id.insert(service.id.clone(), service.clone());

        service
    }

    /// Look up a service by its project-scoped name, the resolution path
    /// the graph compiler uses when binding a plan's `serviceName` fields.
    pub fn get_by_name(&self, project_id: &str, name: &str) -> Result<ServiceInfo> {
        let key = (project_id.to_string(), name.to_string());
        let id = self
            .inner
            .by_name
            .get(&key)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::ServiceNotFound {
                name: name.to_string(),
            })?;

        self.inner
            .by_id
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::ServiceNotFound {
                name: name.to_string(),
            })
    }

    /// Look up a service by id, verifying it belongs to the given project.
    pub fn get(&self, project_id: &str, service_id: &str) -> Result<ServiceInfo> {
        let service = self
            .inner
            .by_id
            .get(service_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::ServiceNotFound {
                name: service_id.to_string(),
            })?;

        if service.project_id != project_id {
            return Err(RegistryError::ServiceNotInProject {
                service_id: service_id.to_string(),
                project_id: project_id.to_string(),
            });
        }

        Ok(service)
    }

    /// List every service registered for a project.
    pub fn list_for_project(&self, project_id: &str) -> Vec<ServiceInfo> {
        self.inner
            .by_id
            .iter()
            .filter(|e| e.value().project_id == project_id)
            .map(|e| e.value().clone())
            .collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
