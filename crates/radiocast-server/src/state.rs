//! Shared application state

use crate::admission::Admission;
use crate::dispatcher::Dispatcher;
use crate::downstream::Forwarder;
use parking_lot::RwLock;
use radiocast_core::types::ConfigSnapshot;
use radiocast_core::{Config, Result};
use radiocast_store::Store;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::info;

/// Everything the handlers and tasks share
pub struct AppState {
    /// File configuration
    pub config: Config,

    /// Store adapter
    pub store: Store,

    /// Live-feed fan-out point
    pub dispatcher: Dispatcher,

    /// Admission registry
    pub admission: Arc<Admission>,

    /// Downstream forwarder
    pub forwarder: Forwarder,

    /// Copy-on-write site configuration
    snapshot: RwLock<Arc<ConfigSnapshot>>,

    /// Bumped on every reload; sessions re-derive their permission when it moves
    version: AtomicU64,

    /// Fired once at shutdown so every session loop closes its transport
    shutdown: broadcast::Sender<()>,
}

impl AppState {
    /// Build the state, loading the initial configuration snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded from the store.
    pub async fn new(config: Config, store: Store, forwarder: Forwarder) -> Result<Self> {
        let snapshot = store.load_config().await?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            config,
            store,
            dispatcher: Dispatcher::new(),
            admission: Arc::new(Admission::new()),
            forwarder,
            snapshot: RwLock::new(Arc::new(snapshot)),
            version: AtomicU64::new(1),
            shutdown,
        })
    }

    /// Subscribe to the shutdown signal
    #[must_use]
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Ask every session loop to close its transport
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// The current configuration snapshot
    #[must_use]
    pub fn config_snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.read().clone()
    }

    /// The current snapshot version
    #[must_use]
    pub fn config_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Publish a fresh snapshot from the store
    ///
    /// Open sessions keep their previous snapshot until their next message.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails; the previous snapshot
    /// stays published in that case.
    pub async fn reload_config(&self) -> Result<u64> {
        let snapshot = self.store.load_config().await?;
        *self.snapshot.write() = Arc::new(snapshot);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        info!(version, "configuration snapshot reloaded");
        Ok(version)
    }
}
