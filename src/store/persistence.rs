//! Snapshot persistence for the in-memory store
//!
//! The keyspace is written as lz4-compressed JSON to a temporary file and
//! renamed into place, so readers never observe a partial snapshot. The CLI
//! and the daemons share state by pointing at the same snapshot file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use super::engine::MemoryStore;
use super::value::Entry;

/// Schema version of the snapshot file
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),
}

/// Snapshot metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotMetadata {
    /// Creation timestamp (epoch ms)
    pub created_at: i64,
    /// Number of keys written
    pub keys: usize,
    /// Compressed size in bytes
    pub size_bytes: usize,
    pub version: u32,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SnapshotFile {
    created_at: i64,
    version: u32,
    entries: Vec<(String, Entry)>,
}

/// Writes and restores keyspace snapshots
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    path: PathBuf,
}

impl SnapshotManager {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot of every live key
    pub fn save(&self, store: &MemoryStore) -> Result<SnapshotMetadata, PersistenceError> {
        let created_at = store.clock().now_millis();
        let file = SnapshotFile {
            created_at,
            version: SNAPSHOT_VERSION,
            entries: store.dump(),
        };
        let keys = file.entries.len();

        let json = serde_json::to_vec(&file)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&json);

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &compressed)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(SnapshotMetadata {
            created_at,
            keys,
            size_bytes: compressed.len(),
            version: SNAPSHOT_VERSION,
        })
    }

    /// Replace the store contents with the snapshot, if one exists
    pub fn load(&self, store: &MemoryStore) -> Result<Option<SnapshotMetadata>, PersistenceError> {
        let compressed = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let json = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| PersistenceError::Corrupted(e.to_string()))?;
        let file: SnapshotFile = serde_json::from_slice(&json)
            .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;
        if file.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::Corrupted(format!(
                "unsupported snapshot version {}",
                file.version
            )));
        }

        let keys = file.entries.len();
        store.restore(file.entries);

        Ok(Some(SnapshotMetadata {
            created_at: file.created_at,
            keys,
            size_bytes: compressed.len(),
            version: file.version,
        }))
    }
}

/// Periodically snapshots the store
pub struct SnapshotWorker {
    store: Arc<MemoryStore>,
    manager: SnapshotManager,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl SnapshotWorker {
    pub fn new(store: Arc<MemoryStore>, manager: SnapshotManager, interval: Duration) -> Self {
        Self {
            store,
            manager,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Snapshot worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);
            interval.tick().await;

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                self.snapshot_once();
            }

            tracing::info!("Snapshot worker stopped");
        })
    }

    /// Take one snapshot, logging the outcome
    pub fn snapshot_once(&self) {
        match self.manager.save(&self.store) {
            Ok(meta) => tracing::debug!(keys = meta.keys, bytes = meta.size_bytes, "Snapshot written"),
            Err(e) => tracing::error!(error = %e, path = %self.manager.path().display(), "Snapshot failed"),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SetOptions, StoreExt};

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().join("state.snapshot"));

        let store = MemoryStore::new();
        store.set("moira-trigger:1", "{}").unwrap();
        store.zadd("moira-notifier-notifications", 10.0, "n").unwrap();
        store
            .set_with("lease", "x", SetOptions::new().ttl(Duration::from_secs(3600)))
            .unwrap();

        let meta = manager.save(&store).unwrap();
        assert_eq!(meta.keys, 3);

        let restored = MemoryStore::new();
        let loaded = manager.load(&restored).unwrap().unwrap();
        assert_eq!(loaded.keys, 3);
        assert_eq!(restored.get("moira-trigger:1").unwrap().as_deref(), Some("{}"));
        assert_eq!(restored.zcard("moira-notifier-notifications").unwrap(), 1);
        assert!(restored.pttl("lease").unwrap() > 0);
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().join("absent"));
        assert!(manager.load(&MemoryStore::new()).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad");
        std::fs::write(&path, b"not a snapshot").unwrap();
        let manager = SnapshotManager::new(&path);
        assert!(manager.load(&MemoryStore::new()).is_err());
    }
}
