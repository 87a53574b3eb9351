//! Entity-level operations over a [`Store`]
//!
//! Every write touching more than one key goes through a single pipeline;
//! reads that must be consistent across keys use a pipelined read or a
//! WATCH/retry loop.

pub mod coalescer;
pub mod contact;
pub mod emergency;
pub mod keys;
pub mod metric;
pub mod notification;
pub mod subscription;
pub mod tag;
pub mod team;
pub mod throttling;
pub mod trigger;
pub mod check;

use moka::sync::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::model::ValidationError;
use crate::store::{Clock, Pipeline, Reply, Store, StoreError, StoreExt};

use coalescer::RemovalCoalescer;

pub use notification::FetchLimit;
pub use throttling::Throttling;

/// Database errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Requested entity is absent
    #[error("nil")]
    Nil,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transaction retry limit exceeded")]
    TransactionRetryLimit,

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub fn is_nil(&self) -> bool {
        matches!(self, DbError::Nil)
    }
}

/// Tunables of the database layer
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Lifetime of cached metric retention values
    pub retention_cache_ttl: Duration,
    /// A metric's old values are removed at most once per window
    pub removal_window: Duration,
    /// Notifications checked this much later than their timestamp are delayed, seconds
    pub delayed_threshold: i64,
    /// Optimistic transaction attempts
    pub transaction_retries: u32,
    /// Pause between optimistic transaction attempts
    pub transaction_backoff: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            retention_cache_ttl: Duration::from_secs(60 * 60),
            removal_window: Duration::from_secs(60),
            delayed_threshold: 60,
            transaction_retries: 10,
            transaction_backoff: Duration::from_millis(200),
        }
    }
}

/// Entity operations shared by every service
pub struct Database {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retention_cache: Cache<String, i64>,
    removals: RemovalCoalescer,
    options: DatabaseOptions,
}

impl Database {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self::with_options(store, clock, DatabaseOptions::default())
    }

    pub fn with_options(store: Arc<dyn Store>, clock: Arc<dyn Clock>, options: DatabaseOptions) -> Self {
        Self {
            retention_cache: Cache::builder()
                .max_capacity(1_000_000)
                .time_to_live(options.retention_cache_ttl)
                .build(),
            removals: RemovalCoalescer::new(clock.clone(), options.removal_window, 100_000),
            store,
            clock,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Current Unix seconds
    pub fn now(&self) -> i64 {
        self.clock.now_secs()
    }

    /// Execute a pipeline, surfacing the first per-command error
    fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>, DbError> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .exec(pipeline)?
            .into_iter()
            .map(|r| r.check().map_err(DbError::from))
            .collect()
    }

    /// Optimistic transaction over `keys`. `build` reads the current state
    /// and returns the batch to commit; on conflict the read is repeated.
    fn transaction<T>(
        &self,
        keys: &[&str],
        mut build: impl FnMut() -> Result<(Pipeline, T), DbError>,
    ) -> Result<T, DbError> {
        for attempt in 0..self.options.transaction_retries {
            let token = self.store.watch(keys)?;
            let (pipeline, value) = build()?;
            match self.store.exec_watched(token, pipeline)? {
                Some(replies) => {
                    for reply in replies {
                        reply.check()?;
                    }
                    return Ok(value);
                }
                None => {
                    tracing::debug!(attempt, keys = ?keys, "Transaction conflicted, retrying");
                    std::thread::sleep(self.options.transaction_backoff);
                }
            }
        }
        Err(DbError::TransactionRetryLimit)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, DbError> {
        match self.store.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(DbError::Nil),
        }
    }

    fn to_json<T: Serialize>(value: &T) -> Result<String, DbError> {
        Ok(serde_json::to_string(value)?)
    }
}

/// Read a JSON record from a pipelined GET reply; `None` when absent
fn decode_reply<T: DeserializeOwned>(reply: Reply) -> Result<Option<T>, DbError> {
    match reply.into_option_string()? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Set-diff of two string lists: (removed, added)
fn diff<'a>(old: &'a [String], new: &'a [String]) -> (Vec<&'a str>, Vec<&'a str>) {
    let removed = old
        .iter()
        .filter(|o| !new.contains(o))
        .map(String::as_str)
        .collect();
    let added = new
        .iter()
        .filter(|n| !old.contains(n))
        .map(String::as_str)
        .collect();
    (removed, added)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::store::testing::RecordingStore;

    /// Database over a recording store with a manual clock at `start_secs`
    pub fn database(start_secs: i64) -> (Arc<RecordingStore>, Database) {
        let store = Arc::new(RecordingStore::new(start_secs));
        let clock: Arc<dyn Clock> = store.clock();
        let db = Database::with_options(
            store.clone(),
            clock,
            DatabaseOptions {
                transaction_backoff: Duration::from_millis(1),
                ..Default::default()
            },
        );
        (store, db)
    }
}
