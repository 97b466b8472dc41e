//! Worker channel manager.
//!
//! Owns one session per connected service and is the single point through
//! which the scheduler dispatches tasks and learns about results and health
//! changes. Transport (the actual WebSocket upgrade and read/write loop) is
//! the web crate's job; this manager only ever sees the
//! [`OutboundEnvelope`]/[`InboundMessage`] boundary plus a channel to push
//! bytes out over.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use moka::sync::Cache;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::connection::{Connection, Session};
use crate::error::{ChannelError, Result};
use crate::protocol::{InboundMessage, OutboundEnvelope, ResultStatus, TaskError};

/// Default ping cadence.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);
/// Default health timeout.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(45);

/// How long a `(serviceID, id, executionID)` triple is remembered to guard
/// against a worker redelivering the same result over the socket (e.g. an
/// at-least-once client retry on its own send path) — long enough to cover
/// any such redelivery, short enough not to grow unbounded.
const RESULT_DEDUP_TTL: Duration = Duration::from_secs(300);
const RESULT_DEDUP_CAPACITY: u64 = 50_000;

/// Events the scheduler and compensation engine subscribe to.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    TaskResult {
        service_id: String,
        id: String,
        execution_id: String,
        status: ResultStatus,
        output: Option<serde_json::Value>,
        error: Option<TaskError>,
    },
    CompensationResult {
        service_id: String,
        id: String,
        execution_id: String,
        status: ResultStatus,
        error: Option<TaskError>,
    },
    HealthChanged {
        service_id: String,
        healthy: bool,
    },
    /// A session was superseded or dropped while tasks were in flight on it;
    /// these task ids never observed a terminal result on the old session
    /// and must be treated as a dispatch failure for retry purposes.
    SessionLost {
        service_id: String,
        pending_task_ids: Vec<String>,
    },
}

pub struct ChannelManager {
    sessions: DashMap<String, Arc<Session>>,
    ping_tasks: DashMap<String, JoinHandle<()>>,
    events_tx: broadcast::Sender<ChannelEvent>,
    ping_interval: Duration,
    health_timeout: Duration,
    max_message_bytes: usize,
    /// Remembers recently-seen `(serviceID, id, executionID)` result keys so
    /// a redelivered `task_result`/`compensation_result` is dropped instead
    /// of broadcast twice.
    result_dedup: Cache<(String, String, String), ()>,
}

impl ChannelManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(
            DEFAULT_PING_INTERVAL,
            DEFAULT_HEALTH_TIMEOUT,
            crate::protocol::DEFAULT_MAX_MESSAGE_BYTES,
        )
    }

    #[must_use]
    pub fn with_config(
        ping_interval: Duration,
        health_timeout: Duration,
        max_message_bytes: usize,
    ) -> Self {
        let (events_tx, _rx) = broadcast::channel(1024);
        Self {
            sessions: DashMap::new(),
            ping_tasks: DashMap::new(),
            events_tx,
            ping_interval,
            health_timeout,
            max_message_bytes,
            result_dedup: Cache::builder()
                .max_capacity(RESULT_DEDUP_CAPACITY)
                .time_to_live(RESULT_DEDUP_TTL)
                .build(),
        }
    }

    /// Subscribe to channel events (task results, health transitions, lost
    /// sessions). Every subscriber sees every event from the point of
    /// subscription onward.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    /// Register a new session for a service, superseding any prior one.
    ///
    /// Returns the new session id. `sink` is the outbound half of the
    /// transport the web layer is driving — every envelope `dispatch`
    /// accepts for this service is written there.
    pub fn connect(
        &self,
        project_id: &str,
        service_id: &str,
        sink: mpsc::UnboundedSender<OutboundEnvelope>,
    ) -> u64 {
        let session = Arc::new(Session::new(project_id.to_string(), sink));
        let session_id = session.session_id;

        if let Some((_, old)) = self.sessions.remove(service_id) {
            self.supersede(service_id, &old);
        }

        self.sessions.insert(service_id.to_string(), session.clone());
        self.spawn_ping_loop(service_id.to_string(), session);

        tracing::info!(service_id = %service_id, session_id, "worker session connected");
        session_id
    }

    /// Remove a service's session, e.g. on socket close. Any tasks still
    /// in flight are reported as lost so the scheduler can retry them.
    pub fn disconnect(&self, service_id: &str, session_id: u64) {
        if let Some(entry) = self.sessions.get(service_id) {
            if entry.session_id != session_id {
                // Already superseded by a newer session; nothing to do.
                return;
            }
        } else {
            return;
        }

        if let Some((_, session)) = self.sessions.remove(service_id) {
            self.abort_ping_loop(service_id);
            let pending = session.drain_pending();
            tracing::info!(service_id = %service_id, session_id, "worker session disconnected");
            if !pending.is_empty() {
                let _ = self.events_tx.send(ChannelEvent::SessionLost {
                    service_id: service_id.to_string(),
                    pending_task_ids: pending,
                });
            }
            let _ = self.events_tx.send(ChannelEvent::HealthChanged {
                service_id: service_id.to_string(),
                healthy: false,
            });
        }
    }

    fn supersede(&self, service_id: &str, old: &Arc<Session>) {
        self.abort_ping_loop(service_id);
        let pending = old.drain_pending();
        tracing::info!(
            service_id = %service_id,
            old_session_id = old.session_id,
            "worker session superseded"
        );
        if !pending.is_empty() {
            let _ = self.events_tx.send(ChannelEvent::SessionLost {
                service_id: service_id.to_string(),
                pending_task_ids: pending,
            });
        }
    }

    fn abort_ping_loop(&self, service_id: &str) {
        if let Some((_, handle)) = self.ping_tasks.remove(service_id) {
            handle.abort();
        }
    }

    fn spawn_ping_loop(&self, service_id: String, session: Arc<Session>) {
        let events_tx = self.events_tx.clone();
        let ping_interval = self.ping_interval;
        let health_timeout = self.health_timeout;
        let session_id = session.session_id;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            loop {
                interval.tick().await;

                if session.sender.send(OutboundEnvelope::Ping).is_err() {
                    return;
                }

                let elapsed = session.millis_since_pong();
                let was_healthy = session.is_healthy();
                let timed_out = elapsed >= health_timeout.as_millis() as i64;

                if timed_out && was_healthy {
                    session
                        .healthy
                        .store(false, std::sync::atomic::Ordering::Release);
                    tracing::warn!(service_id = %service_id, session_id, "worker session unhealthy");
                    let _ = events_tx.send(ChannelEvent::HealthChanged {
                        service_id: service_id.clone(),
                        healthy: false,
                    });
                }
            }
        });

        self.ping_tasks.insert(service_id, handle);
    }

    /// Whether a service currently has a live, healthy session.
    #[must_use]
    pub fn is_healthy(&self, service_id: &str) -> bool {
        self.sessions
            .get(service_id)
            .map(|s| s.is_healthy())
            .unwrap_or(false)
    }

    /// Snapshot the connection state of a service, for the inspection view.
    pub fn connection(&self, service_id: &str) -> Result<Connection> {
        let session =
            self.sessions
                .get(service_id)
                .ok_or_else(|| ChannelError::ServiceNotConnected {
                    service_id: service_id.to_string(),
                })?;

        Ok(Connection {
            service_id: service_id.to_string(),
            session_id: session.session_id,
            last_ping: Utc::now(),
            healthy: session.is_healthy(),
            pending_tasks: session.pending_tasks.lock().expect("lock").iter().cloned().collect(),
        })
    }

    /// Write an envelope to a service's session. Succeeds only if the
    /// session exists, is healthy, and accepted the write.
    pub fn dispatch(&self, service_id: &str, envelope: OutboundEnvelope) -> Result<()> {
        let session =
            self.sessions
                .get(service_id)
                .ok_or_else(|| ChannelError::ServiceNotConnected {
                    service_id: service_id.to_string(),
                })?;

        if !session.is_healthy() {
            return Err(ChannelError::Unhealthy {
                service_id: service_id.to_string(),
            });
        }

        if let Some(task_id) = envelope.task_id() {
            session.track(task_id.to_string());
        }

        session.sender.send(envelope).map_err(|e| {
            ChannelError::DispatchFailed {
                service_id: service_id.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Feed an inbound message read off a service's socket. `raw_len` is the
    /// size of the encoded message on the wire, checked against the
    /// configured bound before any parsing happens upstream — callers
    /// should reject oversized payloads with [`ChannelError::MessageTooLarge`]
    /// before constructing an [`InboundMessage`] at all; this method assumes
    /// that check already passed.
    pub fn handle_message(&self, service_id: &str, message: InboundMessage) {
        let Some(session) = self.sessions.get(service_id) else {
            tracing::debug!(service_id = %service_id, "message from unknown session dropped");
            return;
        };

        match message {
            InboundMessage::Pong => {
                session.mark_pong();
                let _ = self.events_tx.send(ChannelEvent::HealthChanged {
                    service_id: service_id.to_string(),
                    healthy: true,
                });
            }
            InboundMessage::Ping => {
                let _ = session.sender.send(OutboundEnvelope::Ping);
            }
            InboundMessage::HealthUpdate { status } => {
                tracing::debug!(service_id = %service_id, %status, "worker health_update received");
            }
            InboundMessage::TaskResult {
                id,
                execution_id,
                status,
                output,
                error,
            } => {
                if self.is_duplicate_result(service_id, &id, &execution_id) {
                    tracing::debug!(service_id = %service_id, id = %id, "duplicate task_result dropped");
                    return;
                }
                session.untrack(&id);
                let _ = self.events_tx.send(ChannelEvent::TaskResult {
                    service_id: service_id.to_string(),
                    id,
                    execution_id,
                    status,
                    output,
                    error,
                });
            }
            InboundMessage::CompensationResult {
                id,
                execution_id,
                status,
                error,
            } => {
                if self.is_duplicate_result(service_id, &id, &execution_id) {
                    tracing::debug!(service_id = %service_id, id = %id, "duplicate compensation_result dropped");
                    return;
                }
                session.untrack(&id);
                let _ = self.events_tx.send(ChannelEvent::CompensationResult {
                    service_id: service_id.to_string(),
                    id,
                    execution_id,
                    status,
                    error,
                });
            }
        }
    }

    /// Validate an inbound message's encoded length against the configured
    /// bound. The sender is logged and dropped, not disconnected.
    pub fn check_message_size(&self, service_id: &str, size: usize) -> Result<()> {
        if size > self.max_message_bytes {
            tracing::warn!(service_id = %service_id, size, limit = self.max_message_bytes, "oversized message rejected");
            return Err(ChannelError::MessageTooLarge {
                size,
                limit: self.max_message_bytes,
            });
        }
        Ok(())
    }

    /// Every service id currently holding a live session.
    #[must_use]
    pub fn connected_services(&self) -> HashSet<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether `(service_id, id, execution_id)` was already seen recently.
    /// Marks it seen as a side effect, so the first call for a given triple
    /// always returns `false`.
    fn is_duplicate_result(&self, service_id: &str, id: &str, execution_id: &str) -> bool {
        let key = (service_id.to_string(), id.to_string(), execution_id.to_string());
        if self.result_dedup.get(&key).is_some() {
            return true;
        }
        self.result_dedup.insert(key, ());
        false
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        for entry in self.ping_tasks.iter() {
            entry.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connect_test_session(mgr: &ChannelManager, service_id: &str) -> mpsc::UnboundedReceiver<OutboundEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        mgr.connect("proj_1", service_id, tx);
        rx
    }

    #[tokio::test]
    async fn dispatch_writes_to_peer() {
        let mgr = ChannelManager::new();
        let mut rx = connect_test_session(&mgr, "svc_1");

        mgr.dispatch(
            "svc_1",
            OutboundEnvelope::TaskRequest {
                id: "task0".into(),
                idempotency_key: "idem".into(),
                execution_id: "orch_1".into(),
                service_id: "svc_1".into(),
                input: json!({}),
            },
        )
        .expect("dispatch should succeed");

        let received = rx.recv().await.expect("envelope should arrive");
        assert_eq!(received.task_id(), Some("task0"));
    }

    #[tokio::test]
    async fn dispatch_to_unknown_service_fails() {
        let mgr = ChannelManager::new();
        let result = mgr.dispatch(
            "svc_missing",
            OutboundEnvelope::TaskRequest {
                id: "task0".into(),
                idempotency_key: "idem".into(),
                execution_id: "orch_1".into(),
                service_id: "svc_missing".into(),
                input: json!({}),
            },
        );
        assert!(matches!(result, Err(ChannelError::ServiceNotConnected { .. })));
    }

    #[tokio::test]
    async fn supersession_reports_pending_tasks_as_lost() {
        let mgr = ChannelManager::new();
        let mut events = mgr.subscribe();

        let _rx1 = connect_test_session(&mgr, "svc_1");
        mgr.dispatch(
            "svc_1",
            OutboundEnvelope::TaskRequest {
                id: "task0".into(),
                idempotency_key: "idem".into(),
                execution_id: "orch_1".into(),
                service_id: "svc_1".into(),
                input: json!({}),
            },
        )
        .unwrap();

        // A new session for the same service supersedes the first.
        let _rx2 = connect_test_session(&mgr, "svc_1");

        let mut saw_lost = false;
        while let Ok(event) = events.try_recv() {
            if let ChannelEvent::SessionLost { pending_task_ids, .. } = event {
                assert_eq!(pending_task_ids, vec!["task0".to_string()]);
                saw_lost = true;
            }
        }
        assert!(saw_lost, "expected a SessionLost event for the superseded session");
    }

    #[tokio::test]
    async fn task_result_untracks_and_broadcasts() {
        let mgr = ChannelManager::new();
        let mut events = mgr.subscribe();
        let _rx = connect_test_session(&mgr, "svc_1");

        mgr.dispatch(
            "svc_1",
            OutboundEnvelope::TaskRequest {
                id: "task0".into(),
                idempotency_key: "idem".into(),
                execution_id: "orch_1".into(),
                service_id: "svc_1".into(),
                input: json!({}),
            },
        )
        .unwrap();

        mgr.handle_message(
            "svc_1",
            InboundMessage::TaskResult {
                id: "task0".into(),
                execution_id: "orch_1".into(),
                status: ResultStatus::Completed,
                output: Some(json!({"doc": "x"})),
                error: None,
            },
        );

        let event = events.recv().await.unwrap();
        assert!(matches!(event, ChannelEvent::TaskResult { id, .. } if id == "task0"));

        let conn = mgr.connection("svc_1").unwrap();
        assert!(conn.pending_tasks.is_empty());
    }

    #[tokio::test]
    async fn pong_marks_session_healthy() {
        let mgr = ChannelManager::new();
        let mut events = mgr.subscribe();
        let _rx = connect_test_session(&mgr, "svc_1");

        mgr.handle_message("svc_1", InboundMessage::Pong);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            ChannelEvent::HealthChanged { healthy: true, .. }
        ));
        assert!(mgr.is_healthy("svc_1"));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mgr = ChannelManager::with_config(
            DEFAULT_PING_INTERVAL,
            DEFAULT_HEALTH_TIMEOUT,
            16,
        );
        assert!(matches!(
            mgr.check_message_size("svc_1", 17),
            Err(ChannelError::MessageTooLarge { .. })
        ));
        assert!(mgr.check_message_size("svc_1", 16).is_ok());
    }
}
