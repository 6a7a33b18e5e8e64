//! Admission registry
//!
//! Process-wide view of every live session. Enforces the per-credential
//! concurrency cap, owns the periodic ticker that broadcasts listener
//! counts and sweeps expired credentials. All operations are serialized
//! under a single mutex; the ticker snapshots under the mutex and releases
//! it before sending anything.

use crate::dispatcher::SessionId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use radiocast_core::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

/// What the registry tracks per session
#[derive(Clone)]
pub struct Registration {
    /// Credential code the session authenticated with
    pub code: String,

    /// Concurrency cap of that credential
    pub limit: Option<u32>,

    /// Credential expiration
    pub expiration: Option<DateTime<Utc>>,

    /// The session's outbound queue
    pub tx: mpsc::Sender<ServerMessage>,

    /// Signal that tears the session down
    pub shutdown: Arc<Notify>,

    /// Whether the session receives listener-count broadcasts
    pub listener_count: bool,
}

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The session was registered
    Admitted,

    /// The credential's concurrency cap is already reached
    TooMany,
}

/// The process-wide admission registry
#[derive(Default)]
pub struct Admission {
    inner: Mutex<HashMap<SessionId, Registration>>,
}

impl Admission {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to register a session under its credential's cap
    pub fn admit(&self, id: SessionId, registration: Registration) -> AdmitOutcome {
        let mut inner = self.inner.lock();
        if let Some(limit) = registration.limit {
            let held = inner
                .values()
                .filter(|existing| existing.code == registration.code)
                .count();
            if held >= limit as usize {
                return AdmitOutcome::TooMany;
            }
        }
        inner.insert(id, registration);
        AdmitOutcome::Admitted
    }

    /// Release a session's slot; idempotent
    pub fn release(&self, id: &SessionId) {
        self.inner.lock().remove(id);
    }

    /// Total live admitted sessions
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Run the periodic listener-count broadcast and expiry sweep
    #[must_use]
    pub fn run_ticker(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }

    /// One ticker pass: sweep expired sessions, then broadcast the count
    pub fn tick(&self) {
        let now = Utc::now();
        let (expired, listeners, count) = {
            let mut inner = self.inner.lock();

            let expired_ids: Vec<SessionId> = inner
                .iter()
                .filter(|(_, registration)| {
                    registration.expiration.is_some_and(|at| at <= now)
                })
                .map(|(id, _)| *id)
                .collect();
            let expired: Vec<(SessionId, Registration)> = expired_ids
                .into_iter()
                .filter_map(|id| inner.remove(&id).map(|registration| (id, registration)))
                .collect();

            let listeners: Vec<mpsc::Sender<ServerMessage>> = inner
                .values()
                .filter(|registration| registration.listener_count)
                .map(|registration| registration.tx.clone())
                .collect();

            (expired, listeners, inner.len())
        };

        for (id, registration) in expired {
            info!(session = %id, code = %registration.code, "credential expired, closing session");
            let _ = registration.tx.try_send(ServerMessage::Expired);
            registration.shutdown.notify_one();
        }

        for tx in listeners {
            let _ = tx.try_send(ServerMessage::ListenerCount(count));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn registration(
        code: &str,
        limit: Option<u32>,
        expiration: Option<DateTime<Utc>>,
        listener_count: bool,
    ) -> (Registration, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Registration {
                code: code.to_string(),
                limit,
                expiration,
                tx,
                shutdown: Arc::new(Notify::new()),
                listener_count,
            },
            rx,
        )
    }

    #[test]
    fn test_concurrency_cap() {
        let admission = Admission::new();

        let (first, _rx1) = registration("X", Some(1), None, false);
        let (second, _rx2) = registration("X", Some(1), None, false);
        let (other, _rx3) = registration("Y", Some(1), None, false);

        assert_eq!(admission.admit(Uuid::new_v4(), first), AdmitOutcome::Admitted);
        assert_eq!(admission.admit(Uuid::new_v4(), second), AdmitOutcome::TooMany);
        assert_eq!(admission.admit(Uuid::new_v4(), other), AdmitOutcome::Admitted);
        assert_eq!(admission.count(), 2);
    }

    #[test]
    fn test_release_frees_the_slot_idempotently() {
        let admission = Admission::new();
        let id = Uuid::new_v4();

        let (first, _rx1) = registration("X", Some(1), None, false);
        assert_eq!(admission.admit(id, first), AdmitOutcome::Admitted);

        admission.release(&id);
        admission.release(&id);
        assert_eq!(admission.count(), 0);

        let (again, _rx2) = registration("X", Some(1), None, false);
        assert_eq!(admission.admit(Uuid::new_v4(), again), AdmitOutcome::Admitted);
    }

    #[test]
    fn test_unlimited_credential() {
        let admission = Admission::new();
        for _ in 0..10 {
            let (entry, _rx) = registration("open", None, None, false);
            assert_eq!(admission.admit(Uuid::new_v4(), entry), AdmitOutcome::Admitted);
        }
        assert_eq!(admission.count(), 10);
    }

    #[tokio::test]
    async fn test_tick_sweeps_expired_sessions() {
        let admission = Admission::new();
        let id = Uuid::new_v4();

        let (expired, mut expired_rx) = registration(
            "X",
            None,
            Some(Utc::now() - chrono::Duration::seconds(1)),
            false,
        );
        let shutdown = expired.shutdown.clone();
        admission.admit(id, expired);

        let (live, mut live_rx) = registration("Y", None, None, true);
        admission.admit(Uuid::new_v4(), live);

        admission.tick();

        assert_eq!(admission.count(), 1);
        assert_eq!(
            expired_rx.try_recv().expect("expiry signal"),
            ServerMessage::Expired
        );
        tokio::time::timeout(Duration::from_millis(50), shutdown.notified())
            .await
            .expect("shutdown signaled");

        // The surviving opted-in session got the post-sweep count.
        assert_eq!(
            live_rx.try_recv().expect("listener count"),
            ServerMessage::ListenerCount(1)
        );
    }

    #[tokio::test]
    async fn test_tick_skips_sessions_not_opted_in() {
        let admission = Admission::new();
        let (entry, mut rx) = registration("X", None, None, false);
        admission.admit(Uuid::new_v4(), entry);

        admission.tick();
        assert!(rx.try_recv().is_err());
    }
}
