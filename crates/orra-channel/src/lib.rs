//! Persistent worker-channel session manager.
//!
//! Owns the full-duplex connection state for every service/agent currently
//! attached to the control plane: dispatch, health tracking, and session
//! supersession. The actual transport (WebSocket upgrade, read/write loop)
//! lives in the web crate; this crate is transport-agnostic and only deals
//! in [`protocol::OutboundEnvelope`] / [`protocol::InboundMessage`].

pub mod connection;
pub mod error;
pub mod manager;
pub mod protocol;

pub use connection::Connection;
pub use error::{ChannelError, Result};
pub use manager::{ChannelEvent, ChannelManager, DEFAULT_HEALTH_TIMEOUT, DEFAULT_PING_INTERVAL};
pub use protocol::{
    FailureKind, InboundMessage, OutboundEnvelope, ResultStatus, TaskError,
    DEFAULT_MAX_MESSAGE_BYTES,
};
