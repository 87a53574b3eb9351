//! Trigger checker
//!
//! Triggers are checked when one of their patterns receives a point, by a
//! periodic sweep that catches metrics which stopped reporting, and on an
//! interval for triggers served by external sources.

pub mod check;
pub mod cleanup;
pub mod expression;
pub mod source;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::cluster::{CheckLocks, ServiceLease};
use crate::config::CheckerConfig;
use crate::database::Database;
use crate::model::TriggerSource;
use crate::runtime::Shutdown;

pub use check::{CheckError, TriggerChecker};
pub use cleanup::{CleanupReport, DataCleaner};
pub use expression::{Expression, ExpressionContext, ExpressionError};
pub use source::{LocalSource, MetricSource, MetricSources, SourceError};

/// Trigger ids buffered between the schedulers and the workers
const WORK_BUFFER: usize = 16384;

/// Lease guarding the NODATA sweep
pub const NODATA_SERVICE: &str = "moira-nodata-checker";

#[derive(Debug, Default)]
pub struct CheckerStats {
    pub checked: AtomicU64,
    /// Checks skipped because another worker held the lock
    pub skipped: AtomicU64,
    pub errors: AtomicU64,
}

impl CheckerStats {
    pub fn checked(&self) -> u64 {
        self.checked.load(Ordering::Relaxed)
    }
}

pub struct CheckerService {
    config: CheckerConfig,
    database: Arc<Database>,
    sources: MetricSources,
    checker: Arc<TriggerChecker>,
    stats: Arc<CheckerStats>,
}

impl CheckerService {
    /// Create a new checker service
    pub fn new(config: &CheckerConfig, database: Arc<Database>, sources: MetricSources) -> Self {
        Self {
            checker: Arc::new(TriggerChecker::new(database.clone(), sources.clone())),
            config: config.clone(),
            database,
            sources,
            stats: Arc::new(CheckerStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<CheckerStats> {
        &self.stats
    }

    pub fn checker(&self) -> &Arc<TriggerChecker> {
        &self.checker
    }

    /// Run the workers and their feeders until shutdown
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (tx, rx) = mpsc::channel(WORK_BUFFER);
            let queue = Arc::new(Mutex::new(rx));
            let locks = CheckLocks::new(self.database.store().clone());

            let workers: Vec<_> = (0..self.config.workers.max(1))
                .map(|id| {
                    tokio::spawn(worker::run_worker(
                        id,
                        queue.clone(),
                        self.checker.clone(),
                        locks.clone(),
                        self.config.lock_attempts,
                        self.stats.clone(),
                    ))
                })
                .collect();

            let mut feeders = vec![tokio::spawn(worker::metric_event_loop(
                self.database.clone(),
                tx.clone(),
                shutdown.clone(),
            ))];

            let lease = Arc::new(ServiceLease::new(
                self.database.store().clone(),
                NODATA_SERVICE,
                Duration::from_secs(self.config.lease_ttl_secs.max(1)),
            ));
            feeders.push(tokio::spawn(worker::nodata_loop(
                self.database.clone(),
                lease,
                Duration::from_secs(self.config.nodata_check_interval_secs.max(1)),
                tx.clone(),
                shutdown.clone(),
            )));

            let external: Vec<TriggerSource> = [TriggerSource::Remote, TriggerSource::Prometheus]
                .into_iter()
                .filter(|source| self.sources.get(*source).is_ok())
                .collect();
            if !external.is_empty() {
                feeders.push(tokio::spawn(worker::periodic_loop(
                    self.database.clone(),
                    external,
                    Duration::from_secs(self.config.check_interval_secs.max(1)),
                    tx.clone(),
                    shutdown.clone(),
                )));
            }
            drop(tx);

            tracing::info!(workers = workers.len(), "Checker started");
            for feeder in feeders {
                let _ = feeder.await;
            }
            for worker in workers {
                let _ = worker.await;
            }
            tracing::info!(checked = self.stats.checked(), "Checker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::model::{MatchedMetric, State, Trigger};
    use crate::runtime::shutdown_channel;

    #[tokio::test]
    async fn test_metric_events_trigger_checks() {
        let (_store, db) = database(1_000);
        let db = Arc::new(db);
        db.save_trigger(
            Trigger::new("t1", "cpu", "servers.*.cpu")
                .with_thresholds(Some(10.0), Some(20.0))
                .with_patterns(["servers.*.cpu"]),
        )
        .unwrap();

        let config = CheckerConfig {
            workers: 2,
            nodata_check_interval_secs: 3600,
            ..Default::default()
        };
        let sources = MetricSources::new(Arc::new(LocalSource::new(db.clone())));
        let service = Arc::new(CheckerService::new(&config, db.clone(), sources));
        let (trigger, shutdown) = shutdown_channel();
        let handle = service.clone().start(shutdown);

        // wait for the NODATA sweep's first pass so the next check comes from the event
        tokio::time::timeout(Duration::from_secs(5), async {
            while service.stats().checked() < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        db.save_points(&[MatchedMetric::new("servers.a.cpu", 30.0, 990, 60).with_patterns(["servers.*.cpu"])])
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let check = db.get_last_check("t1").ok();
                if check.map(|c| c.metrics.contains_key("servers.a.cpu")).unwrap_or(false) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let check = db.get_last_check("t1").unwrap();
        assert_eq!(check.metrics["servers.a.cpu"].state, State::Error);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
