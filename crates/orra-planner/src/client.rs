//! Planner oracle client.
//!
//! The oracle is an external collaborator: given an action and the calling
//! project's service catalogue, it returns a draft task graph. The real
//! implementation ([`OracleClient`]) talks to it over HTTP; tests substitute
//! a [`Planner`] that returns fixed graphs, per the planner-as-mockable-
//! interface design note.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PlannerError, Result};

/// Bounded request timeout for the oracle call.
pub const ORACLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Retries on transient failure before giving up.
pub const ORACLE_MAX_RETRIES: u32 = 2;

/// One entry in the service catalogue handed to the oracle — just enough
/// for it to decide which service fills which role in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCatalogEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// Request body sent to the oracle.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub action: String,
    pub project_services: Vec<ServiceCatalogEntry>,
    pub input: Value,
}

/// One task in a draft graph, prior to compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftTask {
    pub key: String,
    pub service_name: String,
    /// Field name -> either a literal JSON value or a `"$tasks.<key>.<field>"`
    /// / `"$input.<field>"` reference string.
    pub inputs: HashMap<String, Value>,
}

/// The oracle's response: an unvalidated graph draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftGraph {
    pub tasks: Vec<DraftTask>,
    /// Reference string for the orchestration's overall output.
    pub output: String,
}

/// Abstraction over "ask something to turn an action into a draft graph" so
/// the graph compiler can be exercised without a live oracle.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<DraftGraph>;
}

/// HTTP-backed planner oracle client.
pub struct OracleClient {
    http: reqwest::Client,
    oracle_url: url::Url,
    api_key: String,
}

impl OracleClient {
    pub fn new(oracle_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let url = url::Url::parse(oracle_url)
            .map_err(|e| PlannerError::InvalidOracleUrl(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(ORACLE_TIMEOUT)
            .build()
            .expect("reqwest client should build with static config");

        Ok(Self {
            http,
            oracle_url: url,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Planner for OracleClient {
    async fn plan(&self, request: &PlanRequest) -> Result<DraftGraph> {
        let mut attempt = 0;
        let mut last_err = String::new();

        loop {
            attempt += 1;
            let result = self
                .http
                .post(self.oracle_url.clone())
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<DraftGraph>()
                        .await
                        .map_err(|e| PlannerError::MalformedResponse(e.to_string()));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = format!("oracle returned {}", resp.status());
                }
                Ok(resp) => {
                    // 4xx from the oracle is not a transient condition worth retrying.
                    return Err(PlannerError::RequestFailed {
                        attempts: attempt,
                        reason: format!("oracle returned {}", resp.status()),
                    });
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }

            if attempt > ORACLE_MAX_RETRIES {
                return Err(PlannerError::RequestFailed {
                    attempts: attempt,
                    reason: last_err,
                });
            }

            tracing::warn!(attempt, error = %last_err, "planner oracle call failed, retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPlanner(DraftGraph);

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(&self, _request: &PlanRequest) -> Result<DraftGraph> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fixed_planner_returns_configured_graph() {
        let graph = DraftGraph {
            tasks: vec![DraftTask {
                key: "summarise".into(),
                service_name: "A".into(),
                inputs: HashMap::new(),
            }],
            output: "$tasks.summarise.doc".into(),
        };
        let planner = FixedPlanner(graph.clone());

        let request = PlanRequest {
            action: "summarise".into(),
            project_services: vec![],
            input: serde_json::json!({}),
        };

        let result = planner.plan(&request).await.unwrap();
        assert_eq!(result.output, graph.output);
        assert_eq!(result.tasks.len(), 1);
    }

    #[test]
    fn rejects_malformed_oracle_url() {
        let result = OracleClient::new("not a url", "key");
        assert!(matches!(result, Err(PlannerError::InvalidOracleUrl(_))));
    }
}
