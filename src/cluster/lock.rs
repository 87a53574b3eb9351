//! Per-trigger check lock

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::database::keys;
use crate::store::{SetOptions, Store, StoreError, StoreExt};

/// Lock lifetime; a crashed checker blocks a trigger for at most this long
pub const CHECK_LOCK_TTL: Duration = Duration::from_secs(30);

/// Issues check locks so that a trigger is evaluated by one worker at a time
#[derive(Clone)]
pub struct CheckLocks {
    store: Arc<dyn Store>,
    ttl: Duration,
    backoff: Duration,
}

impl CheckLocks {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_timing(store, CHECK_LOCK_TTL, Duration::from_secs(1))
    }

    pub fn with_timing(store: Arc<dyn Store>, ttl: Duration, backoff: Duration) -> Self {
        Self { store, ttl, backoff }
    }

    /// Single attempt
    pub fn try_acquire(&self, trigger_id: &str) -> Result<Option<CheckLockGuard>, StoreError> {
        let key = keys::check_lock(trigger_id);
        let acquired = self
            .store
            .set_with(&key, "1", SetOptions::new().if_absent().ttl(self.ttl))?;
        Ok(acquired.then(|| CheckLockGuard {
            store: self.store.clone(),
            key,
        }))
    }

    /// Backoff plus a random extra of up to half of it
    fn jittered_backoff(&self) -> Duration {
        let half = (self.backoff.as_millis() / 2) as u64;
        self.backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=half))
    }

    /// Retry with backoff up to `max_attempts` times
    pub async fn acquire(
        &self,
        trigger_id: &str,
        max_attempts: u32,
    ) -> Result<Option<CheckLockGuard>, StoreError> {
        for attempt in 0..max_attempts.max(1) {
            if let Some(guard) = self.try_acquire(trigger_id)? {
                return Ok(Some(guard));
            }
            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.jittered_backoff()).await;
            }
        }
        tracing::debug!(trigger_id = %trigger_id, max_attempts, "Check lock is busy");
        Ok(None)
    }
}

/// Held check lock; released on drop
pub struct CheckLockGuard {
    store: Arc<dyn Store>,
    key: String,
}

impl Drop for CheckLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.del(&[self.key.as_str()]) {
            tracing::error!(key = %self.key, error = %e, "Failed to release check lock");
        }
    }
}
