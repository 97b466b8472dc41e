//! Webhook delivery.
//!
//! A `reqwest`-based HTTP call with a bounded timeout and structured
//! classification of network vs. status-code failures, used here for
//! POSTing orchestration outcomes with the scheduler's retry policy
//! restricted to network errors and 5xx.
//!
//! Deliveries for a single orchestration are serialised (we POST to each of
//! a project's registered webhooks one at a time, in registration order);
//! across orchestrations they run concurrently because each terminal
//! transition spawns its own independent delivery task.
//!
//! The payload status enum (`completed`, `failed`, `compensated`,
//! `compensation_failed`) doesn't say explicitly when `failed` without a
//! compensation pass fires versus always routing through the compensation
//! engine first; this implementation resolves that open question (see
//! DESIGN.md) by delivering immediately on `Completed` and otherwise waiting
//! for the compensation engine's own terminal outcome, since every
//! `Failed`/`Aborted` orchestration always has compensation invoked for it.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use orra_registry::ProjectRegistry;
use orra_scheduler::{RetryPolicy, TerminalEvent};
use orra_store::{OrchestrationStatus, OrchestrationStore};

use crate::error::Result;

/// Bounded per-delivery timeout.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
struct WebhookPayload {
    #[serde(rename = "orchestrationID")]
    orchestration_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Clone)]
pub struct WebhookDelivery {
    http: reqwest::Client,
    projects: ProjectRegistry,
    store: OrchestrationStore,
    retry_policy: RetryPolicy,
}

impl WebhookDelivery {
    #[must_use]
    pub fn new(projects: ProjectRegistry, store: OrchestrationStore) -> Self {
        Self::with_retry_policy(projects, store, RetryPolicy::dispatch_default())
    }

    #[must_use]
    pub fn with_retry_policy(
        projects: ProjectRegistry,
        store: OrchestrationStore,
        retry_policy: RetryPolicy,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .expect("reqwest client should build with static config");

        Self {
            http,
            projects,
            store,
            retry_policy,
        }
    }

    /// Listen for scheduler terminal events. `Completed` is delivered right
    /// away; `Failed`/`Aborted` are left to [`Self::spawn_compensation_listener`]
    /// since failed/aborted orchestrations always route through compensation first.
    pub fn spawn_scheduler_listener(&self, mut terminal_rx: broadcast::Receiver<TerminalEvent>) {
        let delivery = self.clone();
        tokio::spawn(async move {
            loop {
                match terminal_rx.recv().await {
                    Ok(event) if event.status == OrchestrationStatus::Completed => {
                        delivery.spawn(event.orchestration_id);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Listen for compensation-engine terminal events (`Compensated`,
    /// `CompensationFailed`) and deliver those outcomes.
    pub fn spawn_compensation_listener(&self, mut terminal_rx: broadcast::Receiver<TerminalEvent>) {
        let delivery = self.clone();
        tokio::spawn(async move {
            loop {
                match terminal_rx.recv().await {
                    Ok(event) => delivery.spawn(event.orchestration_id),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn(&self, orchestration_id: String) {
        let delivery = self.clone();
        tokio::spawn(async move {
            if let Err(err) = delivery.deliver(&orchestration_id).await {
                tracing::error!(orchestration_id = %orchestration_id, %err, "webhook delivery failed");
            }
        });
    }

    async fn deliver(&self, orchestration_id: &str) -> Result<()> {
        let orchestration = self.store.get(orchestration_id)?;
        let project = self.projects.get(&orchestration.project_id)?;

        let status = match orchestration.status {
            OrchestrationStatus::Completed => "completed",
            OrchestrationStatus::Failed => "failed",
            OrchestrationStatus::Compensated => "compensated",
            OrchestrationStatus::CompensationFailed => "compensation_failed",
            // Any other status reaching here is not one of the four
            // webhook-visible terminal outcomes; nothing to deliver.
            _ => return Ok(()),
        };

        let payload = WebhookPayload {
            orchestration_id: orchestration.id.clone(),
            status,
            result: orchestration.results.clone(),
            error: orchestration.error.clone(),
        };

        for url in &project.webhooks {
            self.deliver_one(url, &payload).await;
        }

        Ok(())
    }

    /// POST to a single webhook URL with the standard backoff policy,
    /// restricted to network errors and 5xx. 4xx is logged and not retried.
    async fn deliver_one(&self, url: &str, payload: &WebhookPayload) {
        let mut attempt: u32 = 0;

        loop {
            let result = self.http.post(url).json(payload).send().await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(url = %url, orchestration_id = %payload.orchestration_id, "webhook delivered");
                    return;
                }
                Ok(resp) if resp.status().is_client_error() => {
                    tracing::warn!(url = %url, status = %resp.status(), "webhook rejected, not retrying");
                    return;
                }
                Ok(resp) => {
                    tracing::warn!(url = %url, status = %resp.status(), attempt, "webhook delivery failed, retrying");
                }
                Err(err) => {
                    tracing::warn!(url = %url, %err, attempt, "webhook delivery failed, retrying");
                }
            }

            attempt += 1;
            if !self.retry_policy.should_retry(attempt) {
                tracing::error!(url = %url, orchestration_id = %payload.orchestration_id, "webhook delivery exhausted retries");
                return;
            }
            tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_omits_absent_result_and_error() {
        let payload = WebhookPayload {
            orchestration_id: "orch_1".into(),
            status: "completed",
            result: Some(json!({"summary": "s"})),
            error: None,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["orchestrationID"], "orch_1");
        assert!(v.get("error").is_none());
    }
}
