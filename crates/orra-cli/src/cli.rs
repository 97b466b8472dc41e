//! CLI argument definitions for the Orra control plane.

use clap::{Parser, Subcommand};

/// Orra -- durable multi-agent orchestration control plane.
#[derive(Parser)]
#[command(
    name = "orra",
    version,
    about = "Orra -- durable multi-agent orchestration control plane",
    long_about = "Plans, compiles, and executes multi-step agent/service workflows as \
                  dependency graphs, dispatching tasks over a persistent worker channel \
                  with retry, compensation, and webhook delivery."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the control plane's HTTP and worker-channel server.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Port to listen on.
        #[arg(long, short, default_value_t = 8080)]
        port: u16,
    },

    /// Show current configuration without starting the server.
    Status,
}
