//! CLI entry point for the Orra control plane.
//!
//! Provides the `orra` command: `orra serve` starts the HTTP/WebSocket
//! server, `orra status` prints resolved configuration without starting it.

mod cli;
mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use orra_channel::{ChannelManager, DEFAULT_HEALTH_TIMEOUT, DEFAULT_PING_INTERVAL};
use orra_planner::OracleClient;
use orra_registry::{ProjectRegistry, ServiceRegistry};
use orra_scheduler::DispatchPool;
use orra_store::OrchestrationStore;
use orra_web::{AppState, WebConfig, WebServer};

use crate::cli::{Cli, Commands};
use crate::config::Config;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, port } => cmd_serve(bind, port).await,
        Commands::Status => cmd_status(),
    }
}

async fn cmd_serve(bind: String, port: u16) -> Result<()> {
    init_tracing();

    let mut config = Config::from_env()?;
    config.bind_addr = bind;
    config.port = port;

    info!(bind = %config.bind_addr, port = config.port, "orra control plane starting");

    let projects = ProjectRegistry::new();
    let services = ServiceRegistry::new();
    let store = OrchestrationStore::new();
    let channel = Arc::new(ChannelManager::with_config(
        DEFAULT_PING_INTERVAL,
        DEFAULT_HEALTH_TIMEOUT,
        config.max_message_bytes,
    ));
    let planner = Arc::new(OracleClient::new(&config.oracle_url, config.oracle_api_key.clone())?);

    let web_config = WebConfig {
        bind_addr: config.bind_addr,
        port: config.port,
        max_message_bytes: config.max_message_bytes,
    };

    let dispatch_pool = DispatchPool::new(config.dispatch_concurrency);
    let state = AppState::new(projects, services, store, channel, planner, web_config, dispatch_pool);

    WebServer::new(state).start().await.map_err(|e| anyhow::anyhow!(e))
}

fn cmd_status() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    println!("orra control plane configuration:");
    println!("  bind:              {}:{}", config.bind_addr, config.port);
    println!("  oracle url:        {}", config.oracle_url);
    println!("  max message bytes: {}", config.max_message_bytes);
    println!("  dispatch concurrency: {}", config.dispatch_concurrency);

    Ok(())
}
