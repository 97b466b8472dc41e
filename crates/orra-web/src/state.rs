//! Shared application state for the web server.
//!
//! One `Arc`-wrapped struct holding every collaborator a handler might need,
//! cloned cheaply per request via axum's `State` extractor.

use std::sync::Arc;

use orra_channel::ChannelManager;
use orra_compensation::CompensationEngine;
use orra_planner::Planner;
use orra_registry::{ProjectRegistry, ServiceRegistry};
use orra_scheduler::{DispatchPool, Scheduler};
use orra_store::OrchestrationStore;
use orra_webhook::WebhookDelivery;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub bind_addr: String,
    pub port: u16,
    pub max_message_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8080,
            max_message_bytes: orra_channel::DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Shared state accessible from every Axum handler and the worker-channel
/// WebSocket upgrade.
#[derive(Clone)]
pub struct AppState {
    pub projects: ProjectRegistry,
    pub services: ServiceRegistry,
    pub store: OrchestrationStore,
    pub channel: Arc<ChannelManager>,
    pub scheduler: Scheduler,
    pub compensation: CompensationEngine,
    pub webhooks: WebhookDelivery,
    pub planner: Arc<dyn Planner>,
    pub config: WebConfig,
}

impl AppState {
    /// Wire every collaborator together and start the background listeners
    /// that connect the scheduler's and compensation engine's terminal
    /// events to webhook delivery and to each other.
    #[must_use]
    pub fn new(
        projects: ProjectRegistry,
        services: ServiceRegistry,
        store: OrchestrationStore,
        channel: Arc<ChannelManager>,
        planner: Arc<dyn Planner>,
        config: WebConfig,
        dispatch_pool: DispatchPool,
    ) -> Self {
        let scheduler = Scheduler::with_config(
            channel.clone(),
            store.clone(),
            dispatch_pool,
            orra_scheduler::RetryPolicy::dispatch_default(),
        );
        let compensation = CompensationEngine::new(channel.clone(), store.clone(), services.clone());
        let webhooks = WebhookDelivery::new(projects.clone(), store.clone());

        // Failed/Aborted orchestrations route through compensation; only
        // Completed is delivered straight from the scheduler's own terminal
        // stream (see orra-webhook/src/delivery.rs for the rationale).
        compensation.spawn_listener(scheduler.subscribe_terminal());
        webhooks.spawn_scheduler_listener(scheduler.subscribe_terminal());
        webhooks.spawn_compensation_listener(compensation.subscribe_terminal());

        Self {
            projects,
            services,
            store,
            channel,
            scheduler,
            compensation,
            webhooks,
            planner,
            config,
        }
    }
}
