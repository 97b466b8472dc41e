//! HTTP surface and worker-channel WebSocket endpoint for the Orra control
//! plane.
//!
//! Thin by design: every handler here delegates straight into
//! `orra-registry`, `orra-store`, `orra-graph`, `orra-planner`,
//! `orra-scheduler`, `orra-compensation`, and `orra-webhook` — this crate
//! owns HTTP/WS framing and authentication only.

pub mod api;
pub mod auth;
pub mod error;
pub mod inspection;
pub mod server;
pub mod state;
pub mod ws;

pub use error::{ApiError, Result};
pub use server::WebServer;
pub use state::{AppState, WebConfig};
