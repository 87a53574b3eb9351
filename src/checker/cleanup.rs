//! Periodic removal of outdated metric points and unused tags

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::config::CleanupConfig;
use crate::database::{Database, DbError};
use crate::runtime::Shutdown;

/// What one cleanup pass removed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub points: i64,
    pub tags: usize,
    pub failed_notifications: i64,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.points == 0 && self.tags == 0 && self.failed_notifications == 0
    }
}

pub struct DataCleaner {
    database: Arc<Database>,
    interval: Duration,
    max_age: Duration,
    failed_max_age: Duration,
    batch_size: usize,
}

impl DataCleaner {
    pub fn new(config: &CleanupConfig, database: Arc<Database>) -> Self {
        Self {
            database,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            max_age: Duration::from_secs(config.metrics_max_age_secs),
            failed_max_age: Duration::from_secs(config.failed_notifications_max_age_secs),
            batch_size: config.batch_size,
        }
    }

    /// One cleanup pass
    pub fn run_once(&self) -> Result<CleanupReport, DbError> {
        Ok(CleanupReport {
            points: self.database.cleanup_outdated_metrics(self.max_age, self.batch_size)?,
            tags: self.database.sweep_tags()?.len(),
            failed_notifications: self.database.trim_failed_notifications(self.failed_max_age)?,
        })
    }

    pub fn start(self: Arc<Self>, mut shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Cleanup worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.run_once() {
                            Ok(report) if !report.is_empty() => {
                                tracing::info!(
                                    points = report.points,
                                    tags = report.tags,
                                    failed_notifications = report.failed_notifications,
                                    "Cleanup pass finished"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "Cleanup pass failed"),
                        }
                    }
                    _ = shutdown.wait() => break,
                }
            }

            tracing::info!("Cleanup worker stopped");
        })
    }
}
