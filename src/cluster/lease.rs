//! Single-instance service lease
//!
//! A lease is a key holding a random token with a TTL. Whoever set the key
//! owns the service until the TTL runs out; renewal and release only touch
//! the key while it still holds the owner's token.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::database::keys;
use crate::runtime::Shutdown;
use crate::store::{Pipeline, SetOptions, Store, StoreError, StoreExt};

/// Registration of a named service
pub struct ServiceLease {
    store: Arc<dyn Store>,
    name: String,
    key: String,
    token: String,
    ttl: Duration,
}

impl ServiceLease {
    /// Create a new lease handle. Nothing is registered yet.
    pub fn new(store: Arc<dyn Store>, name: impl Into<String>, ttl: Duration) -> Self {
        let name = name.into();
        Self {
            key: keys::service_registration(&name),
            token: uuid::Uuid::new_v4().to_string(),
            store,
            name,
            ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Take the lease if nobody holds it
    pub fn register_if_free(&self) -> Result<bool, StoreError> {
        self.store.set_with(
            &self.key,
            &self.token,
            SetOptions::new().if_absent().ttl(self.ttl),
        )
    }

    /// Extend the lease. False when it was lost.
    pub fn renew(&self) -> Result<bool, StoreError> {
        let mut pipe = Pipeline::new();
        pipe.expire(self.key.as_str(), self.ttl);
        self.if_owned(pipe)
    }

    /// Release the lease. False when it was not held.
    pub fn deregister(&self) -> Result<bool, StoreError> {
        let mut pipe = Pipeline::new();
        pipe.del(self.key.as_str());
        self.if_owned(pipe)
    }

    fn if_owned(&self, pipe: Pipeline) -> Result<bool, StoreError> {
        let token = self.store.watch(&[self.key.as_str()])?;
        if self.store.get(&self.key)?.as_deref() != Some(self.token.as_str()) {
            return Ok(false);
        }
        Ok(self.store.exec_watched(token, pipe)?.is_some())
    }

    /// Retry registration every `retry` until it succeeds or shutdown is
    /// requested. Returns false on shutdown.
    pub async fn wait_for(&self, retry: Duration, shutdown: &mut Shutdown) -> bool {
        loop {
            match self.register_if_free() {
                Ok(true) => {
                    tracing::info!(service = %self.name, "Service lease acquired");
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(service = %self.name, error = %e, "Service lease registration failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(retry) => {}
                _ = shutdown.wait() => return false,
            }
        }
    }

    /// Keep the lease alive at a third of its TTL. The returned receiver
    /// fires when the lease is lost. On shutdown the lease is released.
    pub fn spawn_renewer(self: Arc<Self>, mut shutdown: Shutdown) -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let (lost_tx, lost_rx) = oneshot::channel();
        let period = (self.ttl / 3).max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.renew() {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!(service = %self.name, "Service lease lost");
                                let _ = lost_tx.send(());
                                return;
                            }
                            Err(e) => {
                                tracing::error!(service = %self.name, error = %e, "Service lease renewal failed");
                                let _ = lost_tx.send(());
                                return;
                            }
                        }
                    }
                    _ = shutdown.wait() => {
                        if let Err(e) = self.deregister() {
                            tracing::warn!(service = %self.name, error = %e, "Service lease release failed");
                        }
                        return;
                    }
                }
            }
        });
        (handle, lost_rx)
    }
}
