//! Metric points, retention and the pattern index

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use super::keys;
use super::{Database, DbError};
use crate::model::metric::{decode_point, encode_point};
use crate::model::{MatchedMetric, MetricEvent, MetricValue};
use crate::store::{Pipeline, ScoreRange, StoreExt};

impl Database {
    /// Write matched points and announce them on the metric-event channel.
    /// The retention of a metric is written the first time it is seen by
    /// this process within the cache lifetime.
    pub fn save_points(&self, points: &[MatchedMetric]) -> Result<(), DbError> {
        if let Some(bad) = points.iter().find(|p| p.retention <= 0) {
            return Err(DbError::Invariant(format!(
                "metric {} has non-positive retention {}",
                bad.metric, bad.retention
            )));
        }

        let mut pipe = Pipeline::new();
        let mut events = BTreeSet::new();
        let mut retentions = HashMap::new();
        for point in points {
            pipe.zadd(
                keys::metric_data(&point.metric),
                point.retention_timestamp as f64,
                encode_point(point.timestamp, point.value),
            );
            if !retentions.contains_key(&point.metric) && self.retention_cache.get(&point.metric).is_none() {
                pipe.set(keys::metric_retention(&point.metric), point.retention.to_string());
                retentions.insert(point.metric.clone(), point.retention);
            }
            for pattern in &point.patterns {
                pipe.sadd(keys::pattern_metrics(pattern), point.metric.as_str());
                events.insert(MetricEvent {
                    metric: point.metric.clone(),
                    pattern: pattern.clone(),
                });
            }
        }
        self.exec(pipe)?;
        for (metric, retention) in retentions {
            self.retention_cache.insert(metric, retention);
        }

        for event in events {
            self.store
                .publish(keys::METRIC_EVENT_CHANNEL, &Self::to_json(&event)?)?;
        }
        Ok(())
    }

    /// Points of each metric with retention timestamps in `[from, until]`
    pub fn values(
        &self,
        metrics: &[String],
        from: i64,
        until: i64,
    ) -> Result<HashMap<String, Vec<MetricValue>>, DbError> {
        let mut pipe = Pipeline::new();
        for metric in metrics {
            pipe.zrange_by_score(
                keys::metric_data(metric),
                ScoreRange::between(from as f64, until as f64),
                None,
            );
        }
        let replies = self.exec(pipe)?;

        let mut result = HashMap::with_capacity(metrics.len());
        for (metric, reply) in metrics.iter().zip(replies) {
            let values = reply
                .into_scored()?
                .into_iter()
                .filter_map(|(member, score)| {
                    let decoded = decode_point(&member, score);
                    if decoded.is_none() {
                        tracing::warn!(metric = %metric, member = %member, "Skipping malformed point");
                    }
                    decoded
                })
                .collect();
            result.insert(metric.clone(), values);
        }
        Ok(result)
    }

    /// Remove points up to `to_ts`, unless this metric was trimmed recently.
    /// Returns whether the removal was issued.
    pub fn remove_values(&self, metric: &str, to_ts: i64) -> Result<bool, DbError> {
        if !self.removals.should_remove(metric) {
            return Ok(false);
        }
        self.store
            .zrem_range_by_score(&keys::metric_data(metric), ScoreRange::up_to(to_ts as f64))?;
        Ok(true)
    }

    /// Retention step of a metric, seconds
    pub fn retention(&self, metric: &str) -> Result<i64, DbError> {
        if let Some(retention) = self.retention_cache.get(metric) {
            return Ok(retention);
        }
        let raw = self
            .store
            .get(&keys::metric_retention(metric))?
            .ok_or(DbError::Nil)?;
        let retention: i64 = raw
            .parse()
            .map_err(|_| DbError::Invariant(format!("retention of {} is not a number: {}", metric, raw)))?;
        self.retention_cache.insert(metric.to_string(), retention);
        Ok(retention)
    }

    pub fn patterns(&self) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(keys::PATTERN_LIST)?)
    }

    pub fn add_pattern(&self, pattern: &str) -> Result<(), DbError> {
        self.store.sadd(keys::PATTERN_LIST, &[pattern])?;
        Ok(())
    }

    pub fn pattern_metrics(&self, pattern: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::pattern_metrics(pattern))?)
    }

    /// Drop a pattern once no trigger references it
    pub fn remove_pattern_if_unused(&self, pattern: &str) -> Result<bool, DbError> {
        if self.store.scard(&keys::pattern_triggers(pattern))? > 0 {
            return Ok(false);
        }
        self.remove_pattern_with_metrics(pattern)?;
        Ok(true)
    }

    /// Remove a pattern together with every metric it matched
    pub fn remove_pattern_with_metrics(&self, pattern: &str) -> Result<(), DbError> {
        let metrics = self.pattern_metrics(pattern)?;

        let mut pipe = Pipeline::new();
        pipe.srem(keys::PATTERN_LIST, pattern);
        pipe.del(keys::pattern_metrics(pattern));
        pipe.del(keys::pattern_triggers(pattern));
        for metric in &metrics {
            pipe.del(keys::metric_data(metric));
            pipe.del(keys::metric_retention(metric));
        }
        self.exec(pipe)?;

        for metric in &metrics {
            self.retention_cache.invalidate(metric);
        }
        tracing::debug!(pattern = %pattern, metrics = metrics.len(), "Pattern removed");
        Ok(())
    }

    /// Remove points older than `older_than` for every metric of every
    /// pattern, `batch` metrics per transaction. Returns removed points.
    pub fn cleanup_outdated_metrics(&self, older_than: Duration, batch: usize) -> Result<i64, DbError> {
        let cutoff = self.now() - older_than.as_secs() as i64;
        let mut metrics = BTreeSet::new();
        for pattern in self.patterns()? {
            metrics.extend(self.pattern_metrics(&pattern)?);
        }
        let metrics: Vec<String> = metrics.into_iter().collect();

        let mut removed = 0;
        for chunk in metrics.chunks(batch.max(1)) {
            let mut pipe = Pipeline::new();
            for metric in chunk {
                pipe.zrem_range_by_score(keys::metric_data(metric), ScoreRange::up_to(cutoff as f64));
            }
            for reply in self.exec(pipe)? {
                removed += reply.into_int()?;
            }
        }
        tracing::info!(metrics = metrics.len(), removed, "Outdated metrics cleaned up");
        Ok(removed)
    }
}
