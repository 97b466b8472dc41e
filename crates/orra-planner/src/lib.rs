//! Planner oracle client.
//!
//! Turns `{action, project services}` into a draft task graph by calling an
//! external planning oracle, with bounded timeout and retry on transient
//! failure. The oracle itself is out of scope — this crate only specifies
//! its request/response contract and a mockable [`Planner`] trait.

pub mod client;
pub mod error;

pub use client::{
    DraftGraph, DraftTask, OracleClient, PlanRequest, Planner, ServiceCatalogEntry,
    ORACLE_MAX_RETRIES, ORACLE_TIMEOUT,
};
pub use error::{PlannerError, Result};
