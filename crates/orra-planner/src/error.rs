//! Planner client error types.

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The oracle could not be reached or timed out after all retries.
    #[error("planner oracle request failed after {attempts} attempt(s): {reason}")]
    RequestFailed { attempts: u32, reason: String },

    /// The oracle responded but the body didn't match the expected draft
    /// graph shape.
    #[error("planner oracle returned an unparsable draft graph: {0}")]
    MalformedResponse(String),

    #[error("invalid planner oracle url: {0}")]
    InvalidOracleUrl(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
