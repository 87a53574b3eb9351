use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use super::engine::MemoryStore;

/// Expiry worker that periodically removes keys whose TTL has passed.
/// Reads already skip expired keys; this reclaims their memory.
pub struct ExpiryWorker {
    store: Arc<MemoryStore>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl ExpiryWorker {
    pub fn new(store: Arc<MemoryStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Expiry worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                let expired = self.store.purge_expired();
                if expired > 0 {
                    tracing::debug!("Expiry worker removed {} keys", expired);
                }
            }

            tracing::info!("Expiry worker stopped");
        })
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
    use crate::store::{ManualClock, SetOptions, StoreExt};

    #[tokio::test]
    async fn test_worker_purges() {
        let clock = Arc::new(ManualClock::at_secs(10));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        store
            .set_with("k", "v", SetOptions::new().ttl(Duration::from_secs(1)))
            .unwrap();
        clock.advance(Duration::from_secs(2));

        let worker = Arc::new(ExpiryWorker::new(store.clone(), Duration::from_millis(10)));
        let handle = worker.clone().start();
        assert!(worker.is_running());

        time::sleep(Duration::from_millis(50)).await;
        worker.stop();
        handle.await.unwrap();

        assert_eq!(store.key_count(), 0);
    }
}
