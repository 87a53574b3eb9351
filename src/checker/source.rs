//! Metric sources a trigger's targets are resolved against

use std::sync::Arc;

use async_trait::async_trait;

use crate::database::{Database, DbError};
use crate::model::{MetricValue, TriggerSource};

/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("metric source {0} is not configured")]
    NotConfigured(&'static str),

    #[error("metric source unavailable: {0}")]
    Unavailable(String),
}

/// One resolved series
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    /// Points ordered by timestamp
    pub values: Vec<MetricValue>,
}

impl Series {
    /// Most recent point
    pub fn last(&self) -> Option<&MetricValue> {
        self.values.last()
    }
}

/// Result of resolving a target
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub series: Vec<Series>,
    /// Patterns the target was resolved through
    pub patterns: Vec<String>,
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Resolve `target` over `[from, until]`. Without `allow_realtime` the
    /// still-filling retention step is left out.
    async fn fetch(
        &self,
        target: &str,
        from: i64,
        until: i64,
        allow_realtime: bool,
    ) -> Result<FetchResult, SourceError>;
}

/// Serves targets from the points the filter wrote. A target is a pattern.
pub struct LocalSource {
    database: Arc<Database>,
}

impl LocalSource {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl MetricSource for LocalSource {
    async fn fetch(
        &self,
        target: &str,
        from: i64,
        until: i64,
        allow_realtime: bool,
    ) -> Result<FetchResult, SourceError> {
        let mut metrics = self.database.pattern_metrics(target)?;
        metrics.sort();
        let mut values = self.database.values(&metrics, from, until)?;

        let mut series = Vec::with_capacity(metrics.len());
        for name in metrics {
            let mut points = values.remove(&name).unwrap_or_default();
            if !allow_realtime {
                match self.database.retention(&name) {
                    Ok(retention) => points.retain(|p| p.retention_timestamp + retention <= until),
                    Err(DbError::Nil) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            points.sort_by_key(|p| (p.timestamp, p.retention_timestamp));
            series.push(Series { name, values: points });
        }

        Ok(FetchResult {
            series,
            patterns: vec![target.to_string()],
        })
    }
}

/// Metric sources by trigger source
#[derive(Clone)]
pub struct MetricSources {
    local: Arc<dyn MetricSource>,
    remote: Option<Arc<dyn MetricSource>>,
    prometheus: Option<Arc<dyn MetricSource>>,
}

impl MetricSources {
    pub fn new(local: Arc<dyn MetricSource>) -> Self {
        Self {
            local,
            remote: None,
            prometheus: None,
        }
    }

    pub fn with_remote(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.remote = Some(source);
        self
    }

    pub fn with_prometheus(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.prometheus = Some(source);
        self
    }

    pub fn get(&self, source: TriggerSource) -> Result<&Arc<dyn MetricSource>, SourceError> {
        let found = match source {
            TriggerSource::Local => Some(&self.local),
            TriggerSource::Remote => self.remote.as_ref(),
            TriggerSource::Prometheus => self.prometheus.as_ref(),
        };
        found.ok_or(SourceError::NotConfigured(source.as_str()))
    }
}
