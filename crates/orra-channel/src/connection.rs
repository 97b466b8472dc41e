//! Per-service session state.
//!
//! A [`Session`] is the manager's private bookkeeping for one live worker
//! connection. [`Connection`] is the public, cloneable snapshot handed out
//! for inspection — it never exposes the send handle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::protocol::OutboundEnvelope;

/// Monotonically increasing counter so each new session for a `serviceID`
/// can be told apart from the one it supersedes.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Session {
    pub session_id: u64,
    pub project_id: String,
    pub sender: mpsc::UnboundedSender<OutboundEnvelope>,
    pub healthy: AtomicBool,
    pub last_pong: Mutex<DateTime<Utc>>,
    pub pending_tasks: Mutex<HashSet<String>>,
}

impl Session {
    pub(crate) fn new(project_id: String, sender: mpsc::UnboundedSender<OutboundEnvelope>) -> Self {
        Self {
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            project_id,
            sender,
            healthy: AtomicBool::new(true),
            last_pong: Mutex::new(Utc::now()),
            pending_tasks: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub(crate) fn mark_pong(&self) {
        *self.last_pong.lock().expect("session lock poisoned") = Utc::now();
        self.healthy.store(true, Ordering::Release);
    }

    pub(crate) fn millis_since_pong(&self) -> i64 {
        let last = *self.last_pong.lock().expect("session lock poisoned");
        (Utc::now() - last).num_milliseconds()
    }

    pub(crate) fn track(&self, task_id: String) {
        self.pending_tasks
            .lock()
            .expect("session lock poisoned")
            .insert(task_id);
    }

    pub(crate) fn untrack(&self, task_id: &str) {
        self.pending_tasks
            .lock()
            .expect("session lock poisoned")
            .remove(task_id);
    }

    pub(crate) fn drain_pending(&self) -> Vec<String> {
        self.pending_tasks
            .lock()
            .expect("session lock poisoned")
            .drain()
            .collect()
    }
}

/// Read-only snapshot of a service's connection state.
#[derive(Debug, Clone)]
pub struct Connection {
    pub service_id: String,
    pub session_id: u64,
    pub last_ping: DateTime<Utc>,
    pub healthy: bool,
    pub pending_tasks: Vec<String>,
}
