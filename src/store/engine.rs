//! In-memory, sharded implementation of [`Store`].
//!
//! Each shard is a keyspace behind its own mutex. A batch locks every shard
//! it touches in ascending slot order and applies its commands in order, so
//! every batch is atomic. Each live key carries a version that changes
//! whenever the key is modified. Absent keys share the shard's removal
//! generation, bumped on every delete or expiry, so no state is kept for
//! keys that are gone. WATCH snapshots versions and EXEC compares them under
//! the lock.

use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::command::{Command, CommandError, Expiry, Pipeline, Reply, SetCondition};
use super::glob::glob_match;
use super::partitioner::KeyPartitioner;
use super::pubsub::{ChannelReceiver, PubSub};
use super::value::{Entry, StoredValue};
use super::zset::SortedSet;
use super::{ClusterWalker, Store, StoreError, WatchToken};

#[derive(Debug, Default)]
struct Shard {
    entries: HashMap<String, Entry>,
    versions: HashMap<String, u64>,
    counter: u64,
    removed: u64,
}

impl Shard {
    fn touch(&mut self, key: &str) {
        self.counter += 1;
        if self.entries.contains_key(key) {
            self.versions.insert(key.to_string(), self.counter);
        } else {
            self.versions.remove(key);
            self.removed = self.counter;
        }
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(self.removed)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.versions.clear();
        self.counter += 1;
        self.removed = self.counter;
    }

    fn expire_if_due(&mut self, key: &str, now: i64) {
        let due = self
            .entries
            .get(key)
            .map(|e| e.is_expired(now))
            .unwrap_or(false);
        if due {
            self.entries.remove(key);
            self.touch(key);
        }
    }

    fn get(&mut self, key: &str, now: i64) -> Option<&Entry> {
        self.expire_if_due(key, now);
        self.entries.get(key)
    }

    fn insert(&mut self, key: &str, entry: Entry) {
        self.entries.insert(key.to_string(), entry);
        self.touch(key);
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.touch(key);
        }
        removed
    }

    fn read<T>(
        &mut self,
        key: &str,
        now: i64,
        f: impl FnOnce(&StoredValue) -> Result<T, CommandError>,
    ) -> Result<Option<T>, CommandError> {
        match self.get(key, now) {
            Some(entry) => f(&entry.value).map(Some),
            None => Ok(None),
        }
    }

    /// Run `f` against the value under `key`, creating it with `create` when
    /// absent. `f` reports whether it modified the value. Collections left
    /// empty are removed.
    fn mutate<T>(
        &mut self,
        key: &str,
        now: i64,
        create: Option<fn() -> StoredValue>,
        f: impl FnOnce(&mut StoredValue) -> Result<(T, bool), CommandError>,
    ) -> Result<Option<T>, CommandError> {
        self.expire_if_due(key, now);
        if !self.entries.contains_key(key) {
            match create {
                Some(make) => {
                    self.entries.insert(key.to_string(), Entry::new(make()));
                }
                None => return Ok(None),
            }
        }
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };

        let result = f(&mut entry.value);
        let empty = entry.value.is_empty_collection();
        if empty {
            self.entries.remove(key);
        }
        match result {
            Ok((value, modified)) => {
                if modified {
                    self.touch(key);
                }
                Ok(Some(value))
            }
            Err(e) => Err(e),
        }
    }

    fn purge(&mut self, now: i64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
            self.touch(key);
        }
        expired.len()
    }
}

fn new_set() -> StoredValue {
    StoredValue::Set(HashSet::new())
}

fn new_zset() -> StoredValue {
    StoredValue::SortedSet(SortedSet::new())
}

fn new_hash() -> StoredValue {
    StoredValue::Hash(HashMap::new())
}

fn new_list() -> StoredValue {
    StoredValue::List(VecDeque::new())
}

fn wrong(key: &str) -> CommandError {
    CommandError::WrongType(key.to_string())
}

fn list_range(list: &VecDeque<String>, start: i64, stop: i64) -> Vec<String> {
    let len = list.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return Vec::new();
    }
    list.iter()
        .skip(start as usize)
        .take((stop - start + 1) as usize)
        .cloned()
        .collect()
}

/// Shards locked for the duration of one batch
struct Locked<'a> {
    guards: Vec<(usize, MutexGuard<'a, Shard>)>,
    partitioner: &'a KeyPartitioner,
    now: i64,
}

impl<'a> Locked<'a> {
    fn shard(&mut self, key: &str) -> &mut Shard {
        let slot = self.partitioner.slot(key);
        let idx = self
            .guards
            .iter()
            .position(|(s, _)| *s == slot)
            .unwrap_or(0);
        &mut *self.guards[idx].1
    }

    fn apply(&mut self, command: Command) -> Reply {
        self.try_apply(command).unwrap_or_else(Reply::Error)
    }

    fn try_apply(&mut self, command: Command) -> Result<Reply, CommandError> {
        let now = self.now;
        match command {
            Command::Get(key) => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::String(s) => Ok(Reply::Bulk(s.clone())),
                    _ => Err(wrong(&key)),
                })
                .map(|r| r.unwrap_or(Reply::Nil)),

            Command::Set {
                key,
                value,
                options,
            } => {
                let shard = self.shard(&key);
                let existing = shard.get(&key, now).map(|e| e.expires_at);
                let allowed = match options.condition {
                    SetCondition::Always => true,
                    SetCondition::IfAbsent => existing.is_none(),
                    SetCondition::IfPresent => existing.is_some(),
                };
                if !allowed {
                    return Ok(Reply::Bool(false));
                }
                let expires_at = match options.expiry {
                    Expiry::Persist => None,
                    Expiry::Millis(ms) => Some(now + ms),
                    Expiry::Keep => existing.flatten(),
                };
                shard.insert(
                    &key,
                    Entry {
                        value: StoredValue::String(value),
                        expires_at,
                    },
                );
                Ok(Reply::Bool(true))
            }

            Command::GetSet { key, value } => {
                let shard = self.shard(&key);
                let old = match shard.get(&key, now) {
                    None => Reply::Nil,
                    Some(Entry {
                        value: StoredValue::String(s),
                        ..
                    }) => Reply::Bulk(s.clone()),
                    Some(_) => return Err(wrong(&key)),
                };
                shard.insert(&key, Entry::new(StoredValue::String(value)));
                Ok(old)
            }

            Command::Del(keys) => {
                let mut removed = 0;
                for key in &keys {
                    let shard = self.shard(key);
                    shard.expire_if_due(key, now);
                    if shard.remove(key).is_some() {
                        removed += 1;
                    }
                }
                Ok(Reply::Int(removed))
            }

            Command::Exists(key) => {
                let exists = self.shard(&key).get(&key, now).is_some();
                Ok(Reply::Int(exists as i64))
            }

            Command::Expire { key, millis } => {
                let shard = self.shard(&key);
                if shard.get(&key, now).is_none() {
                    return Ok(Reply::Bool(false));
                }
                if millis <= 0 {
                    shard.remove(&key);
                } else {
                    if let Some(entry) = shard.entries.get_mut(&key) {
                        entry.expires_at = Some(now + millis);
                    }
                    shard.touch(&key);
                }
                Ok(Reply::Bool(true))
            }

            Command::Persist(key) => {
                let shard = self.shard(&key);
                shard.expire_if_due(&key, now);
                let cleared = match shard.entries.get_mut(&key) {
                    Some(entry) if entry.expires_at.is_some() => {
                        entry.expires_at = None;
                        true
                    }
                    _ => false,
                };
                if cleared {
                    shard.touch(&key);
                }
                Ok(Reply::Bool(cleared))
            }

            Command::Pttl(key) => {
                let ttl = match self.shard(&key).get(&key, now) {
                    None => -2,
                    Some(Entry {
                        expires_at: None, ..
                    }) => -1,
                    Some(Entry {
                        expires_at: Some(at),
                        ..
                    }) => (at - now).max(0),
                };
                Ok(Reply::Int(ttl))
            }

            Command::Incr(key) => {
                let shard = self.shard(&key);
                let (current, expires_at) = match shard.get(&key, now) {
                    None => (0, None),
                    Some(Entry {
                        value: StoredValue::String(s),
                        expires_at,
                    }) => {
                        let current = s
                            .parse::<i64>()
                            .map_err(|_| CommandError::NotInteger(key.clone()))?;
                        (current, *expires_at)
                    }
                    Some(_) => return Err(wrong(&key)),
                };
                let next = current + 1;
                shard.insert(
                    &key,
                    Entry {
                        value: StoredValue::String(next.to_string()),
                        expires_at,
                    },
                );
                Ok(Reply::Int(next))
            }

            Command::Rename { from, to } => {
                let entry = {
                    let shard = self.shard(&from);
                    shard.expire_if_due(&from, now);
                    shard.remove(&from)
                };
                match entry {
                    Some(entry) => {
                        self.shard(&to).insert(&to, entry);
                        Ok(Reply::Bool(true))
                    }
                    None => Err(CommandError::NoSuchKey(from)),
                }
            }

            Command::SAdd { key, members } => self
                .shard(&key)
                .mutate(&key, now, Some(new_set), |v| match v {
                    StoredValue::Set(set) => {
                        let added = members
                            .into_iter()
                            .filter(|m| set.insert(m.clone()))
                            .count() as i64;
                        Ok((added, added > 0))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::SRem { key, members } => self
                .shard(&key)
                .mutate(&key, now, None, |v| match v {
                    StoredValue::Set(set) => {
                        let removed = members.iter().filter(|m| set.remove(*m)).count() as i64;
                        Ok((removed, removed > 0))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::SMembers(key) => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::Set(set) => {
                        let mut members: Vec<String> = set.iter().cloned().collect();
                        members.sort();
                        Ok(members)
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Strings(r.unwrap_or_default())),

            Command::SIsMember { key, member } => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::Set(set) => Ok(set.contains(&member)),
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Bool(r.unwrap_or(false))),

            Command::SCard(key) => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::Set(set) => Ok(set.len() as i64),
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::SPop { key, count } => self
                .shard(&key)
                .mutate(&key, now, None, |v| match v {
                    StoredValue::Set(set) => {
                        let picked: Vec<String> = set.iter().take(count).cloned().collect();
                        for member in &picked {
                            set.remove(member);
                        }
                        let modified = !picked.is_empty();
                        Ok((picked, modified))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Strings(r.unwrap_or_default())),

            Command::ZAdd { key, entries } => self
                .shard(&key)
                .mutate(&key, now, Some(new_zset), |v| match v {
                    StoredValue::SortedSet(zset) => {
                        let modified = !entries.is_empty();
                        let added = entries
                            .into_iter()
                            .filter(|(score, member)| zset.insert(*score, member.clone()))
                            .count() as i64;
                        Ok((added, modified))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::ZRem { key, members } => self
                .shard(&key)
                .mutate(&key, now, None, |v| match v {
                    StoredValue::SortedSet(zset) => {
                        let removed = members.iter().filter(|m| zset.remove(m)).count() as i64;
                        Ok((removed, removed > 0))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::ZScore { key, member } => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::SortedSet(zset) => Ok(zset.score(&member)),
                    _ => Err(wrong(&key)),
                })
                .map(|r| match r.flatten() {
                    Some(score) => Reply::Float(score),
                    None => Reply::Nil,
                }),

            Command::ZCard(key) => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::SortedSet(zset) => Ok(zset.len() as i64),
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::ZCount { key, range } => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::SortedSet(zset) => Ok(zset.count(&range) as i64),
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::ZRange { key, start, stop } => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::SortedSet(zset) => Ok(zset.range_by_rank(start, stop)),
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Scored(r.unwrap_or_default())),

            Command::ZRangeByScore { key, range, limit } => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::SortedSet(zset) => Ok(zset.range_by_score(&range, limit)),
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Scored(r.unwrap_or_default())),

            Command::ZRemRangeByScore { key, range } => self
                .shard(&key)
                .mutate(&key, now, None, |v| match v {
                    StoredValue::SortedSet(zset) => {
                        let removed = zset.remove_range_by_score(&range) as i64;
                        Ok((removed, removed > 0))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::HSet { key, field, value } => self
                .shard(&key)
                .mutate(&key, now, Some(new_hash), |v| match v {
                    StoredValue::Hash(hash) => {
                        let is_new = hash.insert(field, value).is_none();
                        Ok((is_new as i64, true))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::HGet { key, field } => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::Hash(hash) => Ok(hash.get(&field).cloned()),
                    _ => Err(wrong(&key)),
                })
                .map(|r| match r.flatten() {
                    Some(value) => Reply::Bulk(value),
                    None => Reply::Nil,
                }),

            Command::HDel { key, fields } => self
                .shard(&key)
                .mutate(&key, now, None, |v| match v {
                    StoredValue::Hash(hash) => {
                        let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count() as i64;
                        Ok((removed, removed > 0))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::HGetAll(key) => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::Hash(hash) => {
                        let mut pairs: Vec<(String, String)> =
                            hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                        pairs.sort();
                        Ok(pairs)
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Pairs(r.unwrap_or_default())),

            Command::LPush { key, values } => self
                .shard(&key)
                .mutate(&key, now, Some(new_list), |v| match v {
                    StoredValue::List(list) => {
                        let modified = !values.is_empty();
                        for value in values {
                            list.push_front(value);
                        }
                        Ok((list.len() as i64, modified))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::RPop(key) => self
                .shard(&key)
                .mutate(&key, now, None, |v| match v {
                    StoredValue::List(list) => {
                        let popped = list.pop_back();
                        let modified = popped.is_some();
                        Ok((popped, modified))
                    }
                    _ => Err(wrong(&key)),
                })
                .map(|r| match r.flatten() {
                    Some(value) => Reply::Bulk(value),
                    None => Reply::Nil,
                }),

            Command::LLen(key) => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::List(list) => Ok(list.len() as i64),
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Int(r.unwrap_or(0))),

            Command::LRange { key, start, stop } => self
                .shard(&key)
                .read(&key, now, |v| match v {
                    StoredValue::List(list) => Ok(list_range(list, start, stop)),
                    _ => Err(wrong(&key)),
                })
                .map(|r| Reply::Strings(r.unwrap_or_default())),
        }
    }
}

/// In-memory store engine
pub struct MemoryStore {
    shards: Vec<Mutex<Shard>>,
    partitioner: KeyPartitioner,
    clock: Arc<dyn Clock>,
    pubsub: PubSub,
}

impl MemoryStore {
    /// Single-shard store on the system clock
    pub fn new() -> Self {
        Self::with_shards(1, Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_shards(1, clock)
    }

    /// Store with `shards` partitions. More than one shard enables cluster
    /// semantics: cross-slot commands and watched transactions are rejected.
    pub fn with_shards(shards: usize, clock: Arc<dyn Clock>) -> Self {
        let partitioner = KeyPartitioner::new(shards);
        Self {
            shards: (0..partitioner.shards())
                .map(|_| Mutex::new(Shard::default()))
                .collect(),
            partitioner,
            clock,
            pubsub: PubSub::new(),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn is_cluster(&self) -> bool {
        self.partitioner.is_cluster()
    }

    fn lock(&self, slots: &[usize]) -> Locked<'_> {
        Locked {
            guards: slots.iter().map(|&s| (s, self.shards[s].lock())).collect(),
            partitioner: &self.partitioner,
            now: self.clock.now_millis(),
        }
    }

    fn command_slots(&self, commands: &[Command]) -> Result<Vec<usize>, StoreError> {
        let mut slots = Vec::new();
        for command in commands {
            let command_slots = self.partitioner.slots(command.keys());
            if command_slots.len() > 1 {
                return Err(StoreError::CrossSlot);
            }
            slots.extend(command_slots);
        }
        slots.sort_unstable();
        slots.dedup();
        Ok(slots)
    }

    fn matching_keys(&self, pattern: &str, shard: Option<usize>) -> Vec<String> {
        let now = self.clock.now_millis();
        let mut keys = Vec::new();
        for (idx, lock) in self.shards.iter().enumerate() {
            if shard.map(|s| s != idx).unwrap_or(false) {
                continue;
            }
            let shard = lock.lock();
            keys.extend(
                shard
                    .entries
                    .iter()
                    .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
                    .map(|(k, _)| k.clone()),
            );
        }
        keys.sort();
        keys
    }

    /// Remove every expired key. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.shards.iter().map(|s| s.lock().purge(now)).sum()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_millis();
        self.shards
            .iter()
            .map(|s| s.lock().entries.values().filter(|e| !e.is_expired(now)).count())
            .sum()
    }

    /// Copy of every live entry
    pub fn dump(&self) -> Vec<(String, Entry)> {
        let now = self.clock.now_millis();
        let mut entries = Vec::new();
        for lock in &self.shards {
            let shard = lock.lock();
            entries.extend(
                shard
                    .entries
                    .iter()
                    .filter(|(_, e)| !e.is_expired(now))
                    .map(|(k, e)| (k.clone(), e.clone())),
            );
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Replace the keyspace with `entries`
    pub fn restore(&self, entries: Vec<(String, Entry)>) {
        for lock in &self.shards {
            lock.lock().clear();
        }
        for (key, entry) in entries {
            let slot = self.partitioner.slot(&key);
            self.shards[slot].lock().insert(&key, entry);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("shards", &self.partitioner.shards())
            .field("keys", &self.key_count())
            .finish()
    }
}

impl Store for MemoryStore {
    fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>, StoreError> {
        let commands = pipeline.into_commands();
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let slots = self.command_slots(&commands)?;
        let mut locked = self.lock(&slots);
        Ok(commands.into_iter().map(|c| locked.apply(c)).collect())
    }

    fn watch(&self, keys: &[&str]) -> Result<WatchToken, StoreError> {
        let slots = self.partitioner.slots(keys.iter().copied());
        if slots.len() > 1 {
            return Err(StoreError::CrossSlot);
        }
        let mut locked = self.lock(&slots);
        let now = locked.now;
        let versions = keys
            .iter()
            .map(|key| {
                let shard = locked.shard(key);
                shard.expire_if_due(key, now);
                (key.to_string(), shard.version(key))
            })
            .collect();
        Ok(WatchToken { versions })
    }

    fn exec_watched(
        &self,
        token: WatchToken,
        pipeline: Pipeline,
    ) -> Result<Option<Vec<Reply>>, StoreError> {
        let commands = pipeline.into_commands();
        let mut slots = self.command_slots(&commands)?;
        slots.extend(self.partitioner.slots(token.keys()));
        slots.sort_unstable();
        slots.dedup();
        if slots.len() > 1 {
            return Err(StoreError::CrossSlot);
        }

        let mut locked = self.lock(&slots);
        let now = locked.now;
        for (key, version) in &token.versions {
            let shard = locked.shard(key);
            shard.expire_if_due(key, now);
            if shard.version(key) != *version {
                return Ok(None);
            }
        }
        Ok(Some(commands.into_iter().map(|c| locked.apply(c)).collect()))
    }

    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), StoreError> {
        let keys = self.matching_keys(pattern, None);
        let start = cursor as usize;
        if start >= keys.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + count.max(1)).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, keys[start..end].to_vec()))
    }

    fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        Ok(self.pubsub.publish(channel, message))
    }

    fn subscribe(&self, channel: &str) -> Result<ChannelReceiver, StoreError> {
        Ok(self.pubsub.subscribe(channel))
    }

    fn cluster_walker(&self) -> Option<&dyn ClusterWalker> {
        if self.partitioner.is_cluster() {
            Some(self)
        } else {
            None
        }
    }
}

impl ClusterWalker for MemoryStore {
    fn shard_count(&self) -> usize {
        self.partitioner.shards()
    }

    fn scan_shard(&self, shard: usize, pattern: &str) -> Result<Vec<String>, StoreError> {
        if shard >= self.shards.len() {
            return Ok(Vec::new());
        }
        Ok(self.matching_keys(pattern, Some(shard)))
    }

    fn move_key(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let slots = self.partitioner.slots([from, to]);
        let mut locked = self.lock(&slots);
        let now = locked.now;
        let entry = {
            let shard = locked.shard(from);
            shard.expire_if_due(from, now);
            shard.remove(from)
        };
        match entry {
            Some(entry) => {
                locked.shard(to).insert(to, entry);
                Ok(())
            }
            None => Err(StoreError::Command(CommandError::NoSuchKey(from.to_string()))),
        }
    }
}
