//! Project registry.
//!
//! Maps an API key to a project and holds each project's webhooks and
//! additional API keys. A project lives for the lifetime of the control
//! plane process — there is no persistence across restarts.
//!
//! Internally the registry is backed by two [`DashMap`]s (by project id and
//! by api key) so that authentication lookups never contend with project
//! creation or webhook registration.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RegistryError, Result};
use crate::ids;

/// A tenancy boundary: owns API keys, webhooks, services, and orchestrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub api_key: String,
    #[serde(default)]
    pub additional_api_keys: Vec<String>,
    #[serde(default)]
    pub webhooks: Vec<String>,
}

/// Concurrent project registry.
///
/// Cheaply cloneable (`Arc`-backed) and safe to share across tasks.
#[derive(Clone)]
pub struct ProjectRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    by_id: DashMap<String, Project>,
    /// Reverse index: any valid api key (primary or additional) -> project id.
    by_api_key: DashMap<String, String>,
}

impl ProjectRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                by_id: DashMap::new(),
                by_api_key: DashMap::new(),
            }),
        }
    }

    /// Register a new project with a freshly minted primary API key.
    pub fn register(&self) -> Project {
        let project = Project {
            id: ids::new_project_id(),
            api_key: ids::new_api_key(),
            additional_api_keys: Vec::new(),
            webhooks: Vec::new(),
        };

        tracing::info!(project_id = %project.id, "project registered");

        self.inner
            .by_api_key
            .insert(project.api_key.clone(), project.id.clone());
        self.inner.by_id.insert(project.id.clone(), project.clone());

        project
    }

    /// Resolve an API key (primary or additional) to its owning project.
    ///
    /// Additional keys are equally privileged to the primary — both
    /// resolve here identically.
    pub fn authenticate(&self, api_key: &str) -> Result<Project> {
        let project_id = self
            .inner
            .by_api_key
            .get(api_key)
            .map(|e| e.value().clone())
            .ok_or(RegistryError::InvalidApiKey)?;

        self.inner
            .by_id
            .get(&project_id)
            .map(|e| e.value().clone())
            .ok_or(RegistryError::InvalidApiKey)
    }

    /// Fetch a project by id.
    pub fn get(&self, project_id: &str) -> Result<Project> {
        self.inner
            .by_id
            .get(project_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::ProjectNotFound {
                project_id: project_id.to_string(),
            })
    }

    /// Mint an additional API key for a project.
    pub fn mint_api_key(&self, project_id: &str) -> Result<String> {
        let mut entry =
            self.inner
                .by_id
                .get_mut(project_id)
                .ok_or_else(|| RegistryError::ProjectNotFound {
                    project_id: project_id.to_string(),
                })?;

        let key = ids::new_api_key();
        entry.additional_api_keys.push(key.clone());
        self.inner
            .by_api_key
            .insert(key.clone(), project_id.to_string());

        tracing::info!(project_id = %project_id, "additional api key minted");

        Ok(key)
    }

    /// Register a webhook URL for a project. The URL must parse as absolute.
    pub fn add_webhook(&self, project_id: &str, url: &str) -> Result<()> {
        Url::parse(url).map_err(|_| RegistryError::InvalidWebhookUrl {
            url: url.to_string(),
        })?;

        let mut entry =
            self.inner
                .by_id
                .get_mut(project_id)
                .ok_or_else(|| RegistryError::ProjectNotFound {
                    project_id: project_id.to_string(),
                })?;

        entry.webhooks.push(url.to_string());
        tracing::info!(project_id = %project_id, webhook = %url, "webhook registered");

        Ok(())
    }

    /// Return the webhook URLs registered for a project.
    pub fn webhooks(&self, project_id: &str) -> Result<Vec<String>> {
        self.get(project_id).map(|p| p.webhooks)
    }
}

impl Default for ProjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_authenticate() {
        let reg = ProjectRegistry::new();
        let project = reg.register();

        let authed = reg.authenticate(&project.api_key).expect("should authenticate");
        assert_eq!(authed.id, project.id);
    }

    #[test]
    fn invalid_key_is_rejected() {
        let reg = ProjectRegistry::new();
        let result = reg.authenticate("sk_does_not_exist");
        assert!(matches!(result, Err(RegistryError::InvalidApiKey)));
    }

    #[test]
    fn additional_keys_are_equally_privileged() {
        let reg = ProjectRegistry::new();
        let project = reg.register();

        let extra = reg.mint_api_key(&project.id).expect("mint");
        let authed = reg.authenticate(&extra).expect("additional key authenticates");
        assert_eq!(authed.id, project.id);
    }

    #[test]
    fn webhook_must_be_absolute_url() {
        let reg = ProjectRegistry::new();
        let project = reg.register();

        assert!(reg.add_webhook(&project.id, "https://example.com/hook").is_ok());
        assert!(matches!(
            reg.add_webhook(&project.id, "/not-absolute"),
            Err(RegistryError::InvalidWebhookUrl { .. })
        ));

        let hooks = reg.webhooks(&project.id).unwrap();
        assert_eq!(hooks, vec!["https://example.com/hook".to_string()]);
    }

    #[test]
    fn unknown_project_errors() {
        let reg = ProjectRegistry::new();
        assert!(matches!(
            reg.get("proj_missing"),
            Err(RegistryError::ProjectNotFound { .. })
        ));
    }
}
