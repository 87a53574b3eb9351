//! Check scheduling: metric events, the NODATA sweep and the worker pool

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex};

use super::check::{CheckError, TriggerChecker};
use super::CheckerStats;
use crate::cluster::{CheckLocks, ServiceLease};
use crate::database::{keys, Database};
use crate::model::{MetricEvent, TriggerSource};
use crate::runtime::{shutdown_channel, Shutdown};

/// Pull trigger ids and check them one at a time under the check lock
pub async fn run_worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    checker: Arc<TriggerChecker>,
    locks: CheckLocks,
    lock_attempts: u32,
    stats: Arc<CheckerStats>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(trigger_id) = next else {
            break;
        };

        let guard = match locks.acquire(&trigger_id, lock_attempts).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                stats.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                tracing::error!(trigger_id = %trigger_id, error = %e, "Failed to acquire check lock");
                continue;
            }
        };

        match checker.check(&trigger_id).await {
            Ok(_) => {
                stats.checked.fetch_add(1, Ordering::Relaxed);
            }
            Err(CheckError::TriggerNotFound(_)) => {
                tracing::debug!(trigger_id = %trigger_id, "Trigger disappeared before its check");
            }
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(trigger_id = %trigger_id, error = %e, "Trigger check failed");
            }
        }
        drop(guard);
    }
    tracing::debug!(worker = id, "Check worker stopped");
}

/// Turn metric events into checks of the triggers watching their patterns
pub async fn metric_event_loop(database: Arc<Database>, work: mpsc::Sender<String>, mut shutdown: Shutdown) {
    let mut events = match database.store().subscribe(keys::METRIC_EVENT_CHANNEL) {
        Ok(events) => events,
        Err(e) => {
            tracing::error!(error = %e, "Failed to subscribe to metric events");
            return;
        }
    };

    loop {
        let message = tokio::select! {
            message = events.recv() => message,
            _ = shutdown.wait() => break,
        };
        let raw = match message {
            Ok(raw) => raw,
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Metric event subscriber lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let event: MetricEvent = match serde_json::from_str(&raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(payload = %raw, error = %e, "Malformed metric event");
                continue;
            }
        };
        let trigger_ids = match database.pattern_trigger_ids(&event.pattern) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(pattern = %event.pattern, error = %e, "Failed to load pattern triggers");
                continue;
            }
        };
        for trigger_id in trigger_ids {
            if work.send(trigger_id).await.is_err() {
                return;
            }
        }
    }
    tracing::info!("Metric event listener stopped");
}

/// Queue every trigger of the given sources each `interval`
pub async fn periodic_loop(
    database: Arc<Database>,
    sources: Vec<TriggerSource>,
    interval: Duration,
    work: mpsc::Sender<String>,
    mut shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !enqueue_all(&database, &sources, &work).await {
                    return;
                }
            }
            _ = shutdown.wait() => break,
        }
    }
}

/// The NODATA sweep runs on one instance only. Waits for the lease, then
/// queues every local trigger each `interval` until the lease is lost.
/// Whatever ends the sweep, the renewer is stopped and awaited before
/// returning, which releases a lease still held.
pub async fn nodata_loop(
    database: Arc<Database>,
    lease: Arc<ServiceLease>,
    interval: Duration,
    work: mpsc::Sender<String>,
    mut shutdown: Shutdown,
) {
    let retry = (lease.ttl() / 3).max(Duration::from_millis(10));
    loop {
        if !lease.wait_for(retry, &mut shutdown).await {
            return;
        }
        let (stop, renewer_shutdown) = shutdown_channel();
        let (renewer, mut lost) = lease.clone().spawn_renewer(renewer_shutdown);
        let mut ticker = tokio::time::interval(interval);

        let reacquire = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !enqueue_all(&database, &[TriggerSource::Local], &work).await {
                        tracing::debug!("Check queue closed, stopping NODATA sweep");
                        break false;
                    }
                }
                _ = &mut lost => {
                    tracing::warn!("NODATA checker lost its lease");
                    break true;
                }
                _ = shutdown.wait() => break false,
            }
        };

        stop.trigger();
        if let Err(e) = renewer.await {
            tracing::error!(error = %e, "Lease renewer task failed");
        }
        if !reacquire {
            return;
        }
    }
}

async fn enqueue_all(database: &Database, sources: &[TriggerSource], work: &mpsc::Sender<String>) -> bool {
    let mut ids = HashSet::new();
    for source in sources {
        match database.trigger_ids(Some(*source)) {
            Ok(found) => ids.extend(found),
            Err(e) => tracing::error!(source = source.as_str(), error = %e, "Failed to list triggers"),
        }
    }
    for id in ids {
        if work.send(id).await.is_err() {
            return false;
        }
    }
    true
}
