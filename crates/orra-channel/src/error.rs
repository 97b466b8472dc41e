//! Worker-channel error types.

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connect query carried an api key that does not match the service's project.
    #[error("unauthorized channel connect for service {service_id}")]
    Unauthorized { service_id: String },

    /// No session is currently registered for this service.
    #[error("service not connected: {service_id}")]
    ServiceNotConnected { service_id: String },

    /// A session exists but has missed its health window.
    #[error("service unhealthy: {service_id}")]
    Unhealthy { service_id: String },

    /// An inbound message exceeded the configured size bound.
    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// Writing to the peer's session sink failed — treated as a transient
    /// dispatch error by the scheduler.
    #[error("dispatch failed for service {service_id}: {reason}")]
    DispatchFailed { service_id: String, reason: String },

    #[error("internal channel error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
