//! Startup configuration, read once from the environment at process start.
//! There is no live-editable surface here, so no hot-reload/file-watch
//! machinery is needed.

use std::env;

/// Resolved startup configuration for the `orra` binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub oracle_url: String,
    pub oracle_api_key: String,
    pub max_message_bytes: usize,
    pub dispatch_concurrency: usize,
}

impl Config {
    /// Read configuration from the environment, falling back to defaults
    /// for everything except the oracle's URL and API key, which have no
    /// safe default.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env::var("ORRA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("ORRA_PORT")
            .ok()
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(8080);

        let oracle_url = env::var("ORRA_ORACLE_URL")
            .map_err(|_| anyhow::anyhow!("ORRA_ORACLE_URL must be set (planner oracle endpoint)"))?;

        let oracle_api_key = env::var("ORRA_ORACLE_API_KEY")
            .map_err(|_| anyhow::anyhow!("ORRA_ORACLE_API_KEY must be set (planner oracle bearer token)"))?;

        let max_message_bytes = env::var("ORRA_MAX_MESSAGE_BYTES")
            .ok()
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(orra_channel::DEFAULT_MAX_MESSAGE_BYTES);

        let dispatch_concurrency = env::var("ORRA_DISPATCH_CONCURRENCY")
            .ok()
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(orra_scheduler::DEFAULT_DISPATCH_CONCURRENCY);

        Ok(Self {
            bind_addr,
            port,
            oracle_url,
            oracle_api_key,
            max_message_bytes,
            dispatch_concurrency,
        })
    }
}
