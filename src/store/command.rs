//! Command and reply model of the store.
//!
//! Every operation is expressed as a [`Command`]; a [`Pipeline`] is an ordered
//! batch of commands executed atomically by a [`super::Store`].

use std::collections::HashMap;
use std::ops::Bound;
use std::time::Duration;

use super::StoreError;

/// Existence condition of a SET
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    #[default]
    Always,
    /// NX
    IfAbsent,
    /// XX
    IfPresent,
}

/// Expiry handling of a SET
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Clear any existing TTL
    #[default]
    Persist,
    /// Expire after the given number of milliseconds
    Millis(i64),
    /// KEEPTTL
    Keep,
}

/// Options of a SET command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    pub condition: SetCondition,
    pub expiry: Expiry,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn if_absent(mut self) -> Self {
        self.condition = SetCondition::IfAbsent;
        self
    }

    pub fn if_present(mut self) -> Self {
        self.condition = SetCondition::IfPresent;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.expiry = Expiry::Millis(ttl.as_millis() as i64);
        self
    }

    pub fn keep_ttl(mut self) -> Self {
        self.expiry = Expiry::Keep;
        self
    }
}

/// Score interval of a sorted-set range query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: Bound<f64>,
    pub max: Bound<f64>,
}

impl ScoreRange {
    /// `-inf..+inf`
    pub fn all() -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Unbounded,
        }
    }

    /// `-inf..max` inclusive
    pub fn up_to(max: f64) -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Included(max),
        }
    }

    /// `min..+inf` inclusive
    pub fn from(min: f64) -> Self {
        Self {
            min: Bound::Included(min),
            max: Bound::Unbounded,
        }
    }

    /// `min..max` inclusive on both ends
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Bound::Included(min),
            max: Bound::Included(max),
        }
    }

    pub fn above_min(&self, score: f64) -> bool {
        match self.min {
            Bound::Unbounded => true,
            Bound::Included(min) => score >= min,
            Bound::Excluded(min) => score > min,
        }
    }

    pub fn below_max(&self, score: f64) -> bool {
        match self.max {
            Bound::Unbounded => true,
            Bound::Included(max) => score <= max,
            Bound::Excluded(max) => score < max,
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        self.above_min(score) && self.below_max(score)
    }
}

/// LIMIT offset count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: usize,
    pub count: usize,
}

impl Limit {
    pub fn first(count: usize) -> Self {
        Self { offset: 0, count }
    }
}

/// A single store command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get(String),
    Set {
        key: String,
        value: String,
        options: SetOptions,
    },
    GetSet {
        key: String,
        value: String,
    },
    Del(Vec<String>),
    Exists(String),
    Expire {
        key: String,
        millis: i64,
    },
    Persist(String),
    Pttl(String),
    Incr(String),
    Rename {
        from: String,
        to: String,
    },
    SAdd {
        key: String,
        members: Vec<String>,
    },
    SRem {
        key: String,
        members: Vec<String>,
    },
    SMembers(String),
    SIsMember {
        key: String,
        member: String,
    },
    SCard(String),
    SPop {
        key: String,
        count: usize,
    },
    ZAdd {
        key: String,
        entries: Vec<(f64, String)>,
    },
    ZRem {
        key: String,
        members: Vec<String>,
    },
    ZScore {
        key: String,
        member: String,
    },
    ZCard(String),
    ZCount {
        key: String,
        range: ScoreRange,
    },
    /// Rank range, inclusive, negative ranks count from the end
    ZRange {
        key: String,
        start: i64,
        stop: i64,
    },
    ZRangeByScore {
        key: String,
        range: ScoreRange,
        limit: Option<Limit>,
    },
    ZRemRangeByScore {
        key: String,
        range: ScoreRange,
    },
    HSet {
        key: String,
        field: String,
        value: String,
    },
    HGet {
        key: String,
        field: String,
    },
    HDel {
        key: String,
        fields: Vec<String>,
    },
    HGetAll(String),
    LPush {
        key: String,
        values: Vec<String>,
    },
    RPop(String),
    LLen(String),
    LRange {
        key: String,
        start: i64,
        stop: i64,
    },
}

impl Command {
    /// Keys touched by this command
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Command::Del(keys) => keys.iter().map(String::as_str).collect(),
            Command::Rename { from, to } => vec![from.as_str(), to.as_str()],
            Command::Get(key)
            | Command::Exists(key)
            | Command::Persist(key)
            | Command::Pttl(key)
            | Command::Incr(key)
            | Command::SMembers(key)
            | Command::SCard(key)
            | Command::ZCard(key)
            | Command::HGetAll(key)
            | Command::RPop(key)
            | Command::LLen(key) => vec![key.as_str()],
            Command::Set { key, .. }
            | Command::GetSet { key, .. }
            | Command::Expire { key, .. }
            | Command::SAdd { key, .. }
            | Command::SRem { key, .. }
            | Command::SIsMember { key, .. }
            | Command::SPop { key, .. }
            | Command::ZAdd { key, .. }
            | Command::ZRem { key, .. }
            | Command::ZScore { key, .. }
            | Command::ZCount { key, .. }
            | Command::ZRange { key, .. }
            | Command::ZRangeByScore { key, .. }
            | Command::ZRemRangeByScore { key, .. }
            | Command::HSet { key, .. }
            | Command::HGet { key, .. }
            | Command::HDel { key, .. }
            | Command::LPush { key, .. }
            | Command::LRange { key, .. } => vec![key.as_str()],
        }
    }

    /// Upper-case command name
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get(_) => "GET",
            Command::Set { .. } => "SET",
            Command::GetSet { .. } => "GETSET",
            Command::Del(_) => "DEL",
            Command::Exists(_) => "EXISTS",
            Command::Expire { .. } => "PEXPIRE",
            Command::Persist(_) => "PERSIST",
            Command::Pttl(_) => "PTTL",
            Command::Incr(_) => "INCR",
            Command::Rename { .. } => "RENAME",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SMembers(_) => "SMEMBERS",
            Command::SIsMember { .. } => "SISMEMBER",
            Command::SCard(_) => "SCARD",
            Command::SPop { .. } => "SPOP",
            Command::ZAdd { .. } => "ZADD",
            Command::ZRem { .. } => "ZREM",
            Command::ZScore { .. } => "ZSCORE",
            Command::ZCard(_) => "ZCARD",
            Command::ZCount { .. } => "ZCOUNT",
            Command::ZRange { .. } => "ZRANGE",
            Command::ZRangeByScore { .. } => "ZRANGEBYSCORE",
            Command::ZRemRangeByScore { .. } => "ZREMRANGEBYSCORE",
            Command::HSet { .. } => "HSET",
            Command::HGet { .. } => "HGET",
            Command::HDel { .. } => "HDEL",
            Command::HGetAll(_) => "HGETALL",
            Command::LPush { .. } => "LPUSH",
            Command::RPop(_) => "RPOP",
            Command::LLen(_) => "LLEN",
            Command::LRange { .. } => "LRANGE",
        }
    }
}

/// Per-command failure. Recorded in the reply slot of the failing command;
/// the rest of the batch still applies, as with EXEC.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("WRONGTYPE operation against key '{0}' holding the wrong kind of value")]
    WrongType(String),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("value at '{0}' is not an integer")]
    NotInteger(String),
}

/// Reply of a single command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bulk(String),
    Strings(Vec<String>),
    Scored(Vec<(String, f64)>),
    Pairs(Vec<(String, String)>),
    Error(CommandError),
}

impl Reply {
    fn kind(&self) -> String {
        match self {
            Reply::Nil => "nil".into(),
            Reply::Bool(_) => "bool".into(),
            Reply::Int(_) => "int".into(),
            Reply::Float(_) => "float".into(),
            Reply::Bulk(_) => "bulk".into(),
            Reply::Strings(_) => "strings".into(),
            Reply::Scored(_) => "scored".into(),
            Reply::Pairs(_) => "pairs".into(),
            Reply::Error(e) => format!("error ({})", e),
        }
    }

    fn unexpected(self, expected: &'static str) -> StoreError {
        match self {
            Reply::Error(e) => StoreError::Command(e),
            other => StoreError::UnexpectedReply {
                expected,
                got: other.kind(),
            },
        }
    }

    pub fn into_option_string(self) -> Result<Option<String>, StoreError> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Bulk(s) => Ok(Some(s)),
            other => Err(other.unexpected("bulk or nil")),
        }
    }

    pub fn into_int(self) -> Result<i64, StoreError> {
        match self {
            Reply::Int(i) => Ok(i),
            other => Err(other.unexpected("int")),
        }
    }

    pub fn into_bool(self) -> Result<bool, StoreError> {
        match self {
            Reply::Bool(b) => Ok(b),
            Reply::Int(i) => Ok(i != 0),
            other => Err(other.unexpected("bool")),
        }
    }

    pub fn into_option_float(self) -> Result<Option<f64>, StoreError> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Float(f) => Ok(Some(f)),
            other => Err(other.unexpected("float or nil")),
        }
    }

    pub fn into_strings(self) -> Result<Vec<String>, StoreError> {
        match self {
            Reply::Strings(v) => Ok(v),
            Reply::Scored(v) => Ok(v.into_iter().map(|(m, _)| m).collect()),
            other => Err(other.unexpected("strings")),
        }
    }

    pub fn into_scored(self) -> Result<Vec<(String, f64)>, StoreError> {
        match self {
            Reply::Scored(v) => Ok(v),
            other => Err(other.unexpected("scored")),
        }
    }

    pub fn into_map(self) -> Result<HashMap<String, String>, StoreError> {
        match self {
            Reply::Pairs(v) => Ok(v.into_iter().collect()),
            other => Err(other.unexpected("pairs")),
        }
    }

    /// Surface a per-command error, pass any other reply through
    pub fn check(self) -> Result<Reply, StoreError> {
        match self {
            Reply::Error(e) => Err(StoreError::Command(e)),
            other => Ok(other),
        }
    }
}

/// Ordered batch of commands executed as one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(command: Command) -> Self {
        Self {
            commands: vec![command],
        }
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Get(key.into()))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.set_with(key, value, SetOptions::default())
    }

    pub fn set_with(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        options: SetOptions,
    ) -> &mut Self {
        self.push(Command::Set {
            key: key.into(),
            value: value.into(),
            options,
        })
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Del(vec![key.into()]))
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(Command::Expire {
            key: key.into(),
            millis: ttl.as_millis() as i64,
        })
    }

    pub fn incr(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Incr(key.into()))
    }

    pub fn rename(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.push(Command::Rename {
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SAdd {
            key: key.into(),
            members: vec![member.into()],
        })
    }

    pub fn sadd_many<I, S>(&mut self, key: impl Into<String>, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(Command::SAdd {
            key: key.into(),
            members: members.into_iter().map(Into::into).collect(),
        })
    }

    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SRem {
            key: key.into(),
            members: vec![member.into()],
        })
    }

    pub fn smembers(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::SMembers(key.into()))
    }

    pub fn zadd(&mut self, key: impl Into<String>, score: f64, member: impl Into<String>) -> &mut Self {
        self.push(Command::ZAdd {
            key: key.into(),
            entries: vec![(score, member.into())],
        })
    }

    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::ZRem {
            key: key.into(),
            members: vec![member.into()],
        })
    }

    pub fn zrange_by_score(
        &mut self,
        key: impl Into<String>,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> &mut Self {
        self.push(Command::ZRangeByScore {
            key: key.into(),
            range,
            limit,
        })
    }

    pub fn zrem_range_by_score(&mut self, key: impl Into<String>, range: ScoreRange) -> &mut Self {
        self.push(Command::ZRemRangeByScore {
            key: key.into(),
            range,
        })
    }

    pub fn hset(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(Command::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn hdel(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.push(Command::HDel {
            key: key.into(),
            fields: vec![field.into()],
        })
    }

    pub fn lpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(Command::LPush {
            key: key.into(),
            values: vec![value.into()],
        })
    }
}
