//! Versioned data migrations
//!
//! Each migration rewrites keys or values written by an older release and
//! knows how to undo itself. Forwards are applied in ascending version
//! order, reverses in descending order. Only one process migrates at a
//! time.

pub mod anonymous;
pub mod cluster_keys;
pub mod history;
pub mod teams;
pub mod telegram;
pub mod trigger_types;
pub mod users;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::ServiceLease;
use crate::database::{Database, DbError};
use crate::store::{CommandError, Pipeline, Store, StoreError, StoreExt};

pub use users::UserMaintenance;

/// Lease name held while migrating
pub const MIGRATION_SERVICE: &str = "moira-migrations";

const MIGRATION_LEASE_TTL: Duration = Duration::from_secs(10 * 60);

/// Migration errors
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid version {0:?}, expected <major>.<minor>")]
    InvalidVersion(String),

    #[error("another process holds the {0} lease")]
    Busy(String),

    #[error("the {0} lease was lost while migrating")]
    LeaseLost(String),
}

/// Release a migration starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MigrationError::InvalidVersion(s.to_string());
        let trimmed = s.trim().trim_start_matches('v');
        let mut parts = trimmed.split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        // a patch component is accepted and ignored
        if let Some(patch) = parts.next() {
            patch.parse::<u32>().map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { major, minor })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A reversible rewrite of stored data
pub trait Migration: Send + Sync {
    /// Release whose data layout this migration upgrades
    fn version(&self) -> Version;

    fn description(&self) -> &'static str;

    /// Apply the rewrite. Applying it twice changes nothing.
    fn forward(&self, database: &Database) -> Result<(), MigrationError>;

    /// Undo the rewrite
    fn reverse(&self, database: &Database) -> Result<(), MigrationError>;
}

/// Every migration, oldest first
pub fn registered() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(trigger_types::TriggerTypes),
        Box::new(anonymous::AnonymousContacts),
        Box::new(cluster_keys::ClusterKeys),
        Box::new(telegram::TelegramUsers),
        Box::new(history::HistorySplit),
        Box::new(teams::TeamNames),
    ]
}

/// Runs migrations under the migration lease
pub struct Migrator {
    database: Arc<Database>,
    migrations: Vec<Box<dyn Migration>>,
    lease: ServiceLease,
}

impl Migrator {
    /// Create a new migrator over every registered migration
    pub fn new(database: Arc<Database>) -> Self {
        Self::with_migrations(database, registered())
    }

    pub fn with_migrations(database: Arc<Database>, mut migrations: Vec<Box<dyn Migration>>) -> Self {
        migrations.sort_by_key(|m| m.version());
        Self {
            lease: ServiceLease::new(database.store().clone(), MIGRATION_SERVICE, MIGRATION_LEASE_TTL),
            database,
            migrations,
        }
    }

    pub fn versions(&self) -> Vec<Version> {
        self.migrations.iter().map(|m| m.version()).collect()
    }

    /// Apply every forward migration starting at `from`, ascending.
    /// Returns the versions applied.
    pub fn update(&self, from: Version) -> Result<Vec<Version>, MigrationError> {
        let selected: Vec<&dyn Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version() >= from)
            .map(|m| m.as_ref())
            .collect();
        self.run_locked(selected, |m, db| {
            tracing::info!(version = %m.version(), migration = m.description(), "Applying migration");
            m.forward(db)
        })
    }

    /// Apply the reverse of every migration starting at `to`, descending.
    /// Returns the versions reverted.
    pub fn downgrade(&self, to: Version) -> Result<Vec<Version>, MigrationError> {
        let selected: Vec<&dyn Migration> = self
            .migrations
            .iter()
            .rev()
            .filter(|m| m.version() >= to)
            .map(|m| m.as_ref())
            .collect();
        self.run_locked(selected, |m, db| {
            tracing::info!(version = %m.version(), migration = m.description(), "Reverting migration");
            m.reverse(db)
        })
    }

    fn run_locked<F>(&self, selected: Vec<&dyn Migration>, step: F) -> Result<Vec<Version>, MigrationError>
    where
        F: Fn(&dyn Migration, &Database) -> Result<(), MigrationError>,
    {
        if selected.is_empty() {
            tracing::info!("No migrations to run");
            return Ok(Vec::new());
        }
        if !self.lease.register_if_free()? {
            return Err(MigrationError::Busy(MIGRATION_SERVICE.to_string()));
        }

        let mut done = Vec::new();
        let mut result = Ok(());
        for migration in selected {
            if let Err(e) = step(migration, &self.database) {
                tracing::error!(version = %migration.version(), error = %e, "Migration failed");
                result = Err(e);
                break;
            }
            done.push(migration.version());
            match self.lease.renew() {
                Ok(true) => {}
                Ok(false) => {
                    tracing::error!(version = %migration.version(), "Migration lease lost, stopping");
                    result = Err(MigrationError::LeaseLost(MIGRATION_SERVICE.to_string()));
                    break;
                }
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }

        if let Err(e) = self.lease.deregister() {
            tracing::warn!(error = %e, "Failed to release migration lease");
        }
        result.map(|_| done)
    }
}

/// Keys matching `pattern`, walking every shard when the store is
/// partitioned
pub(crate) fn scan_keys(store: &dyn Store, pattern: &str) -> Result<Vec<String>, StoreError> {
    match store.cluster_walker() {
        Some(walker) => {
            let mut keys = Vec::new();
            for shard in 0..walker.shard_count() {
                keys.extend(walker.scan_shard(shard, pattern)?);
            }
            keys.sort();
            Ok(keys)
        }
        None => store.scan_all(pattern),
    }
}

/// Rename keys. Missing sources are skipped. A partitioned store moves
/// each key on its own since old and new names may live on different
/// shards; otherwise all renames go in one pipeline. Returns the number
/// of keys moved.
pub(crate) fn move_keys(store: &dyn Store, moves: &[(String, String)]) -> Result<usize, StoreError> {
    if moves.is_empty() {
        return Ok(0);
    }

    let mut moved = 0;
    if let Some(walker) = store.cluster_walker() {
        for (from, to) in moves {
            match walker.move_key(from, to) {
                Ok(()) => moved += 1,
                Err(StoreError::Command(CommandError::NoSuchKey(_))) => {}
                Err(e) => return Err(e),
            }
        }
        return Ok(moved);
    }

    let mut pipe = Pipeline::new();
    for (from, to) in moves {
        pipe.rename(from.as_str(), to.as_str());
    }
    for reply in store.exec(pipe)? {
        match reply.check() {
            Ok(_) => moved += 1,
            Err(StoreError::Command(CommandError::NoSuchKey(_))) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(moved)
}

/// Rename every key starting with `old_prefix` to the same suffix under
/// `new_prefix`, leaving keys in `skip` alone
pub(crate) fn move_prefix(
    store: &dyn Store,
    old_prefix: &str,
    new_prefix: &str,
    skip: &[&str],
) -> Result<usize, StoreError> {
    let moves: Vec<(String, String)> = scan_keys(store, &format!("{}*", old_prefix))?
        .into_iter()
        .filter(|key| !skip.contains(&key.as_str()))
        .filter_map(|key| {
            let suffix = key.strip_prefix(old_prefix)?.to_string();
            Some((key, format!("{}{}", new_prefix, suffix)))
        })
        .collect();
    let moved = move_keys(store, &moves)?;
    tracing::debug!(from = old_prefix, to = new_prefix, moved, "Keys renamed");
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::keys;
    use crate::database::testing::database;
    use crate::store::testing::RecordingStore;
    use parking_lot::Mutex;

    #[test]
    fn test_version_parsing_and_order() {
        assert_eq!("2.11".parse::<Version>().unwrap(), Version::new(2, 11));
        assert_eq!("v2.8.1".parse::<Version>().unwrap(), Version::new(2, 8));
        assert!(Version::new(2, 8) < Version::new(2, 11));
        assert!(matches!("2".parse::<Version>(), Err(MigrationError::InvalidVersion(_))));
        assert!(matches!("2.x".parse::<Version>(), Err(MigrationError::InvalidVersion(_))));
    }

    #[test]
    fn test_registered_versions_are_ascending() {
        let (_store, db) = database(0);
        let migrator = Migrator::new(Arc::new(db));
        let versions = migrator.versions();
        let expected: Vec<Version> = ["2.2", "2.7", "2.8", "2.11", "2.12", "2.13"]
            .iter()
            .map(|v| v.parse().unwrap())
            .collect();
        assert_eq!(versions, expected);
    }

    struct Recorder {
        version: Version,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Migration for Recorder {
        fn version(&self) -> Version {
            self.version
        }

        fn description(&self) -> &'static str {
            "recorder"
        }

        fn forward(&self, _database: &Database) -> Result<(), MigrationError> {
            self.log.lock().push(format!("up {}", self.version));
            Ok(())
        }

        fn reverse(&self, _database: &Database) -> Result<(), MigrationError> {
            self.log.lock().push(format!("down {}", self.version));
            Ok(())
        }
    }

    fn recorders(log: &Arc<Mutex<Vec<String>>>) -> Vec<Box<dyn Migration>> {
        [(2, 11), (2, 2), (2, 8)]
            .into_iter()
            .map(|(major, minor)| {
                Box::new(Recorder {
                    version: Version::new(major, minor),
                    log: log.clone(),
                }) as Box<dyn Migration>
            })
            .collect()
    }

    #[test]
    fn test_update_and_downgrade_order() {
        let (_store, db) = database(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let migrator = Migrator::with_migrations(Arc::new(db), recorders(&log));

        assert_eq!(migrator.update(Version::new(2, 8)).unwrap().len(), 2);
        assert_eq!(migrator.downgrade(Version::new(2, 2)).unwrap().len(), 3);
        assert_eq!(
            *log.lock(),
            vec!["up 2.8", "up 2.11", "down 2.11", "down 2.8", "down 2.2"]
        );
    }

    #[test]
    fn test_lease_blocks_second_migrator() {
        let (store, db) = database(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let migrator = Migrator::with_migrations(Arc::new(db), recorders(&log));

        let holder = ServiceLease::new(store.clone(), MIGRATION_SERVICE, Duration::from_secs(60));
        assert!(holder.register_if_free().unwrap());
        assert!(matches!(migrator.update(Version::new(2, 2)), Err(MigrationError::Busy(_))));
        assert!(log.lock().is_empty());

        holder.deregister().unwrap();
        assert_eq!(migrator.update(Version::new(2, 2)).unwrap().len(), 3);
    }

    /// Overwrites the migration lease as if another process took it over
    struct LeaseTakeover;

    impl Migration for LeaseTakeover {
        fn version(&self) -> Version {
            Version::new(2, 2)
        }

        fn description(&self) -> &'static str {
            "lease takeover"
        }

        fn forward(&self, database: &Database) -> Result<(), MigrationError> {
            database
                .store()
                .set(&keys::service_registration(MIGRATION_SERVICE), "other")?;
            Ok(())
        }

        fn reverse(&self, _database: &Database) -> Result<(), MigrationError> {
            Ok(())
        }
    }

    #[test]
    fn test_lost_lease_stops_update() {
        let (store, db) = database(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut migrations = recorders(&log);
        migrations.retain(|m| m.version() != Version::new(2, 2));
        migrations.push(Box::new(LeaseTakeover));
        let migrator = Migrator::with_migrations(Arc::new(db), migrations);

        assert!(matches!(
            migrator.update(Version::new(2, 2)),
            Err(MigrationError::LeaseLost(_))
        ));
        assert!(log.lock().is_empty());
        assert_eq!(
            store
                .get(&keys::service_registration(MIGRATION_SERVICE))
                .unwrap()
                .as_deref(),
            Some("other")
        );
    }

    #[test]
    fn test_move_keys_skips_missing_sources() {
        for shards in [1, 4] {
            let store = RecordingStore::with_shards(0, shards);
            store.set("old-a", "1").unwrap();
            let moves = vec![
                ("old-a".to_string(), "{new}:a".to_string()),
                ("old-b".to_string(), "{new}:b".to_string()),
            ];
            assert_eq!(move_keys(&store, &moves).unwrap(), 1);
            assert_eq!(store.get("{new}:a").unwrap().as_deref(), Some("1"));
            assert!(!store.exists("old-a").unwrap());
            assert_eq!(move_keys(&store, &moves).unwrap(), 0);
        }
    }
}
