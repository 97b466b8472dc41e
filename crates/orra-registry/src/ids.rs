//! Opaque identifier generation.
//!
//! All entities the control plane hands out to callers (projects, API keys,
//! services, orchestrations, tasks) are time-ordered UUIDv7 values rendered
//! with a short type prefix so that identifiers are self-describing in logs
//! and HTTP responses, e.g. `proj_01913d2a-...`.

use uuid::Uuid;

/// Generate a new opaque identifier of the given kind.
///
/// `prefix` should be a short lowercase tag (`"proj"`, `"key"`, `"svc"`,
/// `"orch"`, `"task"`) — callers typically wrap this in a `const fn`-free
/// helper specific to the entity they're minting.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

/// Mint a project identifier.
#[must_use]
pub fn new_project_id() -> String {
    new_id("proj")
}

/// Mint an API key. Unlike the other identifiers this is a bearer credential,
/// not just a reference, so it carries more entropy than a plain UUID.
#[must_use]
pub fn new_api_key() -> String {
    format!("sk_{}{}", Uuid::now_v7().simple(), Uuid::now_v7().simple())
}

/// Mint a service identifier.
#[must_use]
pub fn new_service_id() -> String {
    new_id("svc")
}

/// Mint an orchestration identifier.
#[must_use]
pub fn new_orchestration_id() -> String {
    new_id("orch")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(new_project_id().starts_with("proj_"));
        assert!(new_service_id().starts_with("svc_"));
        assert!(new_orchestration_id().starts_with("orch_"));
    }

    #[test]
    fn api_keys_are_unique() {
        let a = new_api_key();
        let b = new_api_key();
        assert_ne!(a, b);
        assert!(a.starts_with("sk_"));
    }
}
