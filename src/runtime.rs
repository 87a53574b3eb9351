//! Process-wide handles assembled at start-up

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::StoreConfig;
use crate::database::{Database, DatabaseOptions};
use crate::store::{Clock, MemoryStore, PersistenceError, SnapshotManager, Store};

/// Receiving side of the shutdown signal. Cheap to clone; every
/// long-running loop holds one.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown was requested
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sending side of the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a connected shutdown pair
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Build the store described by `config`, restoring its snapshot when one
/// is configured and present
pub fn open_store(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<MemoryStore>, Option<SnapshotManager>), PersistenceError> {
    let store = Arc::new(MemoryStore::with_shards(config.shards.max(1), clock));
    let snapshots = config.snapshot_path.as_ref().map(SnapshotManager::new);
    if let Some(manager) = &snapshots {
        match manager.load(&store)? {
            Some(meta) => tracing::info!(
                keys = meta.keys,
                path = %manager.path().display(),
                "Snapshot restored"
            ),
            None => tracing::info!(path = %manager.path().display(), "No snapshot, starting empty"),
        }
    }
    Ok((store, snapshots))
}

/// Store handle, database, clock and shutdown signal shared by the
/// services of one process
pub struct Runtime {
    store: Arc<dyn Store>,
    database: Arc<Database>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownTrigger,
}

impl Runtime {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, options: DatabaseOptions) -> Self {
        let database = Arc::new(Database::with_options(store.clone(), clock.clone(), options));
        let (shutdown, _) = shutdown_channel();
        Self {
            store,
            database,
            clock,
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.subscribe()
    }

    /// Ask every service holding a [`Shutdown`] to stop
    pub fn shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.shutdown.trigger();
    }
}
