//! Webhook delivery for the Orra control plane.
//!
//! POSTs final orchestration outcomes to a project's registered webhook
//! URLs with retry on network errors or 5xx.

pub mod delivery;
pub mod error;

pub use delivery::{WebhookDelivery, WEBHOOK_TIMEOUT};
pub use error::{Result, WebhookError};
