//! Live-feed dispatcher
//!
//! Single fan-out point for newly ingested calls. Each session registers a
//! handle carrying its bounded outbound queue and a pointer-swapped filter
//! snapshot; `notify_call` reads the snapshot without holding any lock
//! during matching and never blocks the ingestion caller.

use dashmap::DashMap;
use parking_lot::RwLock;
use radiocast_core::protocol::ServerMessage;
use radiocast_core::types::{Call, LivefeedMap, Scope};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Session identifier
pub type SessionId = Uuid;

/// A session's effective live-feed filter
///
/// The credential scope intersected with the session's subscription map.
/// `livefeed: None` means the session is detached from the live feed
/// (`LFM null`); it still holds its connection and config.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Credential allow-list
    pub scope: Scope,

    /// Subscription map; `None` detaches the session
    pub livefeed: Option<LivefeedMap>,
}

impl SessionFilter {
    /// Whether a call should be delivered under this filter
    ///
    /// A call matches when its own pair is admitted, or when any of its
    /// patched talkgroups is.
    #[must_use]
    pub fn matches(&self, call: &Call) -> bool {
        let Some(livefeed) = &self.livefeed else {
            return false;
        };
        let pair_active = |talkgroup| {
            self.scope.allows(call.system, talkgroup) && livefeed.is_active(call.system, talkgroup)
        };
        pair_active(call.talkgroup) || call.patches.iter().any(|&patch| pair_active(patch))
    }
}

/// Shared handle to a session's filter snapshot
pub type FilterHandle = Arc<RwLock<Arc<SessionFilter>>>;

/// What the dispatcher knows about one session
#[derive(Clone)]
pub struct SessionHandle {
    /// Pointer-swapped filter snapshot
    pub filter: FilterHandle,

    /// Bounded outbound queue
    pub tx: mpsc::Sender<ServerMessage>,

    /// Signal that tears the session down
    pub shutdown: Arc<Notify>,
}

/// The singleton fan-out point
#[derive(Default)]
pub struct Dispatcher {
    sessions: DashMap<SessionId, SessionHandle>,
}

impl Dispatcher {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session
    pub fn register(&self, id: SessionId, handle: SessionHandle) {
        self.sessions.insert(id, handle);
    }

    /// Remove a session; idempotent
    pub fn unregister(&self, id: &SessionId) {
        self.sessions.remove(id);
    }

    /// Number of registered sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Fan a newly ingested call out to every matching session
    ///
    /// Enqueues to all matching sessions before returning. A session whose
    /// queue is full is marked for drop and skipped; the caller is never
    /// blocked.
    pub fn notify_call(&self, call: &Call) {
        let mut dropped = Vec::new();

        for entry in &self.sessions {
            let filter = entry.value().filter.read().clone();
            if !filter.matches(call) {
                continue;
            }

            let message = ServerMessage::Call {
                call: Box::new(call.clone()),
                flag: None,
            };
            match entry.value().tx.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session = %entry.key(), "outbound queue full, dropping session");
                    dropped.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(session = %entry.key(), "session queue closed");
                    dropped.push(*entry.key());
                }
            }
        }

        for id in dropped {
            if let Some((_, handle)) = self.sessions.remove(&id) {
                handle.shutdown.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filter(scope_json: &str, livefeed_json: Option<&str>) -> SessionFilter {
        SessionFilter {
            scope: serde_json::from_str(scope_json).unwrap(),
            livefeed: livefeed_json.map(|json| serde_json::from_str(json).unwrap()),
        }
    }

    fn call(system: i32, talkgroup: i32, patches: Vec<i32>) -> Call {
        Call {
            system,
            talkgroup,
            patches,
            ..Call::default()
        }
    }

    fn handle(filter: SessionFilter, depth: usize) -> (SessionHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(depth);
        (
            SessionHandle {
                filter: Arc::new(RwLock::new(Arc::new(filter))),
                tx,
                shutdown: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    #[test]
    fn test_filter_requires_scope_and_subscription() {
        let active = filter("\"*\"", Some(r#"{"1":{"1001":true,"1002":false}}"#));
        assert!(active.matches(&call(1, 1001, Vec::new())));
        assert!(!active.matches(&call(1, 1002, Vec::new())));
        assert!(!active.matches(&call(2, 1001, Vec::new())));

        let scoped = filter(r#"{"1":[1002]}"#, Some(r#"{"1":{"1001":true,"1002":true}}"#));
        // Subscribed but outside the credential scope.
        assert!(!scoped.matches(&call(1, 1001, Vec::new())));
        assert!(scoped.matches(&call(1, 1002, Vec::new())));
    }

    #[test]
    fn test_filter_matches_patches() {
        let active = filter("\"*\"", Some(r#"{"1":{"1001":true}}"#));
        // The call's own talkgroup is not subscribed, but a patch is.
        assert!(active.matches(&call(1, 1002, vec![1001])));
        assert!(!active.matches(&call(1, 1002, vec![1003])));
    }

    #[test]
    fn test_detached_filter_matches_nothing() {
        let detached = filter("\"*\"", None);
        assert!(!detached.matches(&call(1, 1001, Vec::new())));
    }

    #[tokio::test]
    async fn test_notify_call_enqueues_to_matching_sessions() {
        let dispatcher = Dispatcher::new();

        let (matching, mut matching_rx) =
            handle(filter("\"*\"", Some(r#"{"1":{"1001":true}}"#)), 8);
        let (other, mut other_rx) = handle(filter("\"*\"", Some(r#"{"2":{"2001":true}}"#)), 8);
        dispatcher.register(Uuid::new_v4(), matching);
        dispatcher.register(Uuid::new_v4(), other);

        dispatcher.notify_call(&call(1, 1001, Vec::new()));

        let delivered = matching_rx.try_recv().expect("matching session gets the call");
        match delivered {
            ServerMessage::Call { call, flag } => {
                assert_eq!(call.system, 1);
                assert_eq!(call.talkgroup, 1001);
                assert!(flag.is_none());
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_call_drops_saturated_session() {
        let dispatcher = Dispatcher::new();
        let (session, mut rx) = handle(filter("\"*\"", Some(r#"{"1":{"1001":true}}"#)), 1);
        let shutdown = session.shutdown.clone();
        let id = Uuid::new_v4();
        dispatcher.register(id, session);

        dispatcher.notify_call(&call(1, 1001, Vec::new()));
        assert_eq!(dispatcher.len(), 1);

        // The queue is full now; the next call marks the session for drop.
        dispatcher.notify_call(&call(1, 1001, Vec::new()));
        assert_eq!(dispatcher.len(), 0);

        // The shutdown permit is stored for the session loop to observe.
        tokio::time::timeout(std::time::Duration::from_millis(50), shutdown.notified())
            .await
            .expect("shutdown signaled");

        // The first call is still queued; the second never was.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_filter_snapshot_swap_is_observed() {
        let dispatcher = Dispatcher::new();
        let (session, mut rx) = handle(filter("\"*\"", None), 8);
        let filter_handle = session.filter.clone();
        dispatcher.register(Uuid::new_v4(), session);

        dispatcher.notify_call(&call(1, 1001, Vec::new()));
        assert!(rx.try_recv().is_err(), "detached session receives nothing");

        *filter_handle.write() = Arc::new(filter("\"*\"", Some(r#"{"1":{"1001":true}}"#)));
        dispatcher.notify_call(&call(1, 1001, Vec::new()));
        assert!(rx.try_recv().is_ok());
    }
}
