//! Batching writer of matched points

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::matcher::MetricMatcher;
use super::parser::ParsedMetric;
use super::FilterStats;
use crate::database::Database;
use crate::model::MatchedMetric;

pub struct BatchWriter {
    database: Arc<Database>,
    matcher: Arc<MetricMatcher>,
    stats: Arc<FilterStats>,
    batch_size: usize,
    timeout: Duration,
}

impl BatchWriter {
    pub fn new(
        database: Arc<Database>,
        matcher: Arc<MetricMatcher>,
        stats: Arc<FilterStats>,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            database,
            matcher,
            stats,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Drain the channel until every sender is gone, flushing a batch when
    /// it is full or the timeout passes
    pub async fn run(self, mut points: mpsc::Receiver<ParsedMetric>) {
        let mut batch: Vec<MatchedMetric> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.timeout);

        loop {
            tokio::select! {
                point = points.recv() => {
                    let Some(point) = point else {
                        break;
                    };
                    if let Some(matched) = self.matcher.match_point(&point) {
                        batch.push(matched);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch);
                        }
                    }
                }
                _ = ticker.tick() => self.flush(&mut batch),
            }
        }
        self.flush(&mut batch);
        tracing::info!("Filter writer stopped");
    }

    fn flush(&self, batch: &mut Vec<MatchedMetric>) {
        if batch.is_empty() {
            return;
        }
        match self.database.save_points(batch) {
            Ok(()) => {
                self.stats
                    .matched
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(points = batch.len(), error = %e, "Failed to save points");
            }
        }
        batch.clear();
    }
}
