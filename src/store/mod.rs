//! Key-value store abstraction
//!
//! Every service talks to the shared state through [`Store`]: ordered
//! command batches that apply atomically, optimistic WATCH/EXEC
//! transactions, cursor scans and pub/sub. [`MemoryStore`] is the engine
//! shipped with the crate; cluster-mode behaviour is enabled by giving it
//! more than one shard.

pub mod clock;
pub mod command;
pub mod engine;
pub mod expiry;
pub mod glob;
pub mod partitioner;
pub mod persistence;
pub mod pubsub;
pub mod value;
pub mod zset;

#[cfg(test)]
pub mod testing;

use std::collections::HashMap;
use std::time::Duration;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandError, Limit, Pipeline, Reply, ScoreRange, SetOptions};
pub use engine::MemoryStore;
pub use expiry::ExpiryWorker;
pub use persistence::{PersistenceError, SnapshotManager, SnapshotWorker};
pub use pubsub::ChannelReceiver;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("CROSSSLOT keys in request don't hash to the same slot")]
    CrossSlot,

    #[error("unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: &'static str, got: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key versions captured by [`Store::watch`]. Dropping the token unwatches.
#[derive(Debug, Clone, Default)]
pub struct WatchToken {
    pub(crate) versions: Vec<(String, u64)>,
}

impl WatchToken {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|(k, _)| k.as_str())
    }
}

/// Shared state backend
pub trait Store: Send + Sync {
    /// Execute a batch atomically. Per-command failures are returned in
    /// their reply slot; the batch itself only fails on routing errors.
    fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>, StoreError>;

    /// Start an optimistic transaction over `keys`
    fn watch(&self, keys: &[&str]) -> Result<WatchToken, StoreError>;

    /// Execute a batch only if no watched key changed since [`Store::watch`].
    /// Returns `None` when the transaction was aborted.
    fn exec_watched(
        &self,
        token: WatchToken,
        pipeline: Pipeline,
    ) -> Result<Option<Vec<Reply>>, StoreError>;

    /// Cursor scan over keys matching a glob pattern. A returned cursor of
    /// zero ends the iteration.
    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), StoreError>;

    fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError>;

    fn subscribe(&self, channel: &str) -> Result<ChannelReceiver, StoreError>;

    /// Per-shard access, available only in cluster mode
    fn cluster_walker(&self) -> Option<&dyn ClusterWalker> {
        None
    }
}

/// Shard-level operations of a cluster deployment
pub trait ClusterWalker: Send + Sync {
    fn shard_count(&self) -> usize;

    /// Keys on one shard matching a glob pattern
    fn scan_shard(&self, shard: usize, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Move a key across slots, the way DUMP/RESTORE/DEL would
    fn move_key(&self, from: &str, to: &str) -> Result<(), StoreError>;
}

const SCAN_COUNT: usize = 1000;

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Single-command helpers over [`Store`]
pub trait StoreExt: Store {
    fn exec_one(&self, command: Command) -> Result<Reply, StoreError> {
        self.exec(Pipeline::single(command))?
            .pop()
            .ok_or(StoreError::UnexpectedReply {
                expected: "reply",
                got: "nothing".to_string(),
            })?
            .check()
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.exec_one(Command::Get(key.to_string()))?
            .into_option_string()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_with(key, value, SetOptions::new()).map(|_| ())
    }

    /// SET with options. Returns false when the condition prevented the write.
    fn set_with(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        self.exec_one(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
            options,
        })?
        .into_bool()
    }

    fn getset(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        self.exec_one(Command::GetSet {
            key: key.to_string(),
            value: value.to_string(),
        })?
        .into_option_string()
    }

    fn del(&self, keys: &[&str]) -> Result<i64, StoreError> {
        self.exec_one(Command::Del(owned(keys)))?.into_int()
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.exec_one(Command::Exists(key.to_string()))?.into_bool()
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.exec_one(Command::Expire {
            key: key.to_string(),
            millis: ttl.as_millis() as i64,
        })?
        .into_bool()
    }

    /// Remaining TTL in millis, -1 without expiry, -2 when missing
    fn pttl(&self, key: &str) -> Result<i64, StoreError> {
        self.exec_one(Command::Pttl(key.to_string()))?.into_int()
    }

    fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.exec_one(Command::Incr(key.to_string()))?.into_int()
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.exec_one(Command::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
        .map(|_| ())
    }

    fn sadd(&self, key: &str, members: &[&str]) -> Result<i64, StoreError> {
        self.exec_one(Command::SAdd {
            key: key.to_string(),
            members: owned(members),
        })?
        .into_int()
    }

    fn srem(&self, key: &str, members: &[&str]) -> Result<i64, StoreError> {
        self.exec_one(Command::SRem {
            key: key.to_string(),
            members: owned(members),
        })?
        .into_int()
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.exec_one(Command::SMembers(key.to_string()))?
            .into_strings()
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.exec_one(Command::SIsMember {
            key: key.to_string(),
            member: member.to_string(),
        })?
        .into_bool()
    }

    fn scard(&self, key: &str) -> Result<i64, StoreError> {
        self.exec_one(Command::SCard(key.to_string()))?.into_int()
    }

    fn spop(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        self.exec_one(Command::SPop {
            key: key.to_string(),
            count,
        })?
        .into_strings()
    }

    fn zadd(&self, key: &str, score: f64, member: &str) -> Result<i64, StoreError> {
        self.exec_one(Command::ZAdd {
            key: key.to_string(),
            entries: vec![(score, member.to_string())],
        })?
        .into_int()
    }

    fn zrem(&self, key: &str, members: &[&str]) -> Result<i64, StoreError> {
        self.exec_one(Command::ZRem {
            key: key.to_string(),
            members: owned(members),
        })?
        .into_int()
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.exec_one(Command::ZScore {
            key: key.to_string(),
            member: member.to_string(),
        })?
        .into_option_float()
    }

    fn zcard(&self, key: &str) -> Result<i64, StoreError> {
        self.exec_one(Command::ZCard(key.to_string()))?.into_int()
    }

    fn zcount(&self, key: &str, range: ScoreRange) -> Result<i64, StoreError> {
        self.exec_one(Command::ZCount {
            key: key.to_string(),
            range,
        })?
        .into_int()
    }

    fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>, StoreError> {
        self.exec_one(Command::ZRange {
            key: key.to_string(),
            start,
            stop,
        })?
        .into_scored()
    }

    fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.exec_one(Command::ZRangeByScore {
            key: key.to_string(),
            range,
            limit,
        })?
        .into_scored()
    }

    fn zrem_range_by_score(&self, key: &str, range: ScoreRange) -> Result<i64, StoreError> {
        self.exec_one(Command::ZRemRangeByScore {
            key: key.to_string(),
            range,
        })?
        .into_int()
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<i64, StoreError> {
        self.exec_one(Command::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        })?
        .into_int()
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.exec_one(Command::HGet {
            key: key.to_string(),
            field: field.to_string(),
        })?
        .into_option_string()
    }

    fn hdel(&self, key: &str, fields: &[&str]) -> Result<i64, StoreError> {
        self.exec_one(Command::HDel {
            key: key.to_string(),
            fields: owned(fields),
        })?
        .into_int()
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.exec_one(Command::HGetAll(key.to_string()))?.into_map()
    }

    fn lpush(&self, key: &str, value: &str) -> Result<i64, StoreError> {
        self.exec_one(Command::LPush {
            key: key.to_string(),
            values: vec![value.to_string()],
        })?
        .into_int()
    }

    fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.exec_one(Command::RPop(key.to_string()))?
            .into_option_string()
    }

    fn llen(&self, key: &str) -> Result<i64, StoreError> {
        self.exec_one(Command::LLen(key.to_string()))?.into_int()
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.exec_one(Command::LRange {
            key: key.to_string(),
            start,
            stop,
        })?
        .into_strings()
    }

    /// Every key matching a glob pattern, walking the cursor to the end
    fn scan_all(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = self.scan(cursor, pattern, SCAN_COUNT)?;
            keys.extend(page);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
