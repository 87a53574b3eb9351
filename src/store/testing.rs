//! Test doubles for code built on [`Store`]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{
    ChannelReceiver, ClusterWalker, ManualClock, MemoryStore, Pipeline, Reply, Store, StoreError,
    WatchToken,
};

/// Wraps a [`MemoryStore`], recording executed command names. The backend
/// can be switched off, made to reject writes to some keys, or raced by
/// writes injected right before a watched EXEC.
pub struct RecordingStore {
    inner: MemoryStore,
    clock: Arc<ManualClock>,
    log: Mutex<Vec<&'static str>>,
    down: AtomicBool,
    failing: Mutex<Vec<String>>,
    interference: Mutex<VecDeque<(Option<&'static str>, Pipeline)>>,
}

impl RecordingStore {
    pub fn new(start_secs: i64) -> Self {
        Self::with_shards(start_secs, 1)
    }

    pub fn with_shards(start_secs: i64, shards: usize) -> Self {
        let clock = Arc::new(ManualClock::at_secs(start_secs));
        Self {
            inner: MemoryStore::with_shards(shards, clock.clone()),
            clock,
            log: Mutex::new(Vec::new()),
            down: AtomicBool::new(false),
            failing: Mutex::new(Vec::new()),
            interference: Mutex::new(VecDeque::new()),
        }
    }

    pub fn clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Command names executed so far
    pub fn commands(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Make every call fail with [`StoreError::Unavailable`]
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail every batch touching a key that starts with `prefix`
    pub fn fail_prefix(&self, prefix: &str) {
        self.failing.lock().push(prefix.to_string());
    }

    /// Queue a batch to run right before the next watched EXEC, as if
    /// another client wrote between WATCH and EXEC
    pub fn interfere(&self, pipeline: Pipeline) {
        self.interference.lock().push_back((None, pipeline));
    }

    /// Queue a batch to run right before the next batch issuing `command`
    pub fn interfere_before(&self, command: &'static str, pipeline: Pipeline) {
        self.interference.lock().push_back((Some(command), pipeline));
    }

    /// Run the next queued batch when `pipeline` is the one it waits for
    fn run_interference(&self, pipeline: &Pipeline, watched: bool) -> Result<(), StoreError> {
        let mut queue = self.interference.lock();
        let due = match queue.front() {
            Some((None, _)) => watched,
            Some((Some(name), _)) => pipeline.commands().iter().any(|c| c.name() == *name),
            None => false,
        };
        if !due {
            return Ok(());
        }
        match queue.pop_front() {
            Some((_, other)) => {
                drop(queue);
                self.inner.exec(other).map(|_| ())
            }
            None => Ok(()),
        }
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    fn check_keys(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        let failing = self.failing.lock();
        let hit = pipeline
            .commands()
            .iter()
            .flat_map(|c| c.keys())
            .find(|key| failing.iter().any(|p| key.starts_with(p.as_str())));
        match hit {
            Some(key) => Err(StoreError::Unavailable(format!("write to {} refused", key))),
            None => Ok(()),
        }
    }

    fn record(&self, pipeline: &Pipeline) {
        self.log
            .lock()
            .extend(pipeline.commands().iter().map(|c| c.name()));
    }
}

impl Store for RecordingStore {
    fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>, StoreError> {
        self.check_up()?;
        self.check_keys(&pipeline)?;
        self.run_interference(&pipeline, false)?;
        self.record(&pipeline);
        self.inner.exec(pipeline)
    }

    fn watch(&self, keys: &[&str]) -> Result<WatchToken, StoreError> {
        self.check_up()?;
        self.log.lock().push("WATCH");
        self.inner.watch(keys)
    }

    fn exec_watched(
        &self,
        token: WatchToken,
        pipeline: Pipeline,
    ) -> Result<Option<Vec<Reply>>, StoreError> {
        self.check_up()?;
        self.check_keys(&pipeline)?;
        self.run_interference(&pipeline, true)?;
        self.record(&pipeline);
        self.inner.exec_watched(token, pipeline)
    }

    fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), StoreError> {
        self.check_up()?;
        self.log.lock().push("SCAN");
        self.inner.scan(cursor, pattern, count)
    }

    fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        self.check_up()?;
        self.log.lock().push("PUBLISH");
        self.inner.publish(channel, message)
    }

    fn subscribe(&self, channel: &str) -> Result<ChannelReceiver, StoreError> {
        self.check_up()?;
        self.inner.subscribe(channel)
    }

    fn cluster_walker(&self) -> Option<&dyn ClusterWalker> {
        self.inner.cluster_walker()
    }
}
