//! Pattern matching of incoming points with result caching

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use parking_lot::RwLock;

use super::parser::ParsedMetric;
use super::patterns::PatternIndex;
use super::retention::RetentionRules;
use crate::model::MatchedMetric;

struct Snapshot {
    patterns: Vec<String>,
    index: Arc<PatternIndex>,
}

/// Matches points against the current pattern set
pub struct MetricMatcher {
    current: RwLock<Snapshot>,
    retentions: RetentionRules,
    /// Metrics that matched nothing, skipped until they expire
    unknown: Cache<String, ()>,
    matched: Cache<String, Arc<Vec<String>>>,
}

impl MetricMatcher {
    /// Create a new matcher with an empty pattern set
    pub fn new(retentions: RetentionRules, unknown_ttl: Duration) -> Self {
        Self {
            current: RwLock::new(Snapshot {
                patterns: Vec::new(),
                index: Arc::new(PatternIndex::default()),
            }),
            retentions,
            unknown: Cache::builder()
                .max_capacity(1_000_000)
                .time_to_live(unknown_ttl)
                .build(),
            matched: Cache::builder()
                .max_capacity(1_000_000)
                .time_to_idle(Duration::from_secs(10 * 60))
                .build(),
        }
    }

    /// Replace the pattern set. Returns false when it did not change.
    pub fn refresh(&self, mut patterns: Vec<String>) -> bool {
        patterns.sort();
        patterns.dedup();
        if self.current.read().patterns == patterns {
            return false;
        }

        let index = Arc::new(PatternIndex::new(&patterns));
        tracing::info!(patterns = index.len(), "Pattern index rebuilt");
        *self.current.write() = Snapshot { patterns, index };
        self.unknown.invalidate_all();
        self.matched.invalidate_all();
        true
    }

    pub fn pattern_count(&self) -> usize {
        self.current.read().index.len()
    }

    fn patterns_for(&self, metric: &str) -> Arc<Vec<String>> {
        if let Some(found) = self.matched.get(metric) {
            return found;
        }
        let index = Arc::clone(&self.current.read().index);
        let found = Arc::new(index.matches(metric));
        self.matched.insert(metric.to_string(), Arc::clone(&found));
        found
    }

    /// The point with its patterns and retention, or `None` when no
    /// pattern wants it
    pub fn match_point(&self, point: &ParsedMetric) -> Option<MatchedMetric> {
        if self.unknown.contains_key(&point.name) {
            return None;
        }
        let patterns = self.patterns_for(&point.name);
        if patterns.is_empty() {
            self.unknown.insert(point.name.clone(), ());
            return None;
        }
        let retention = self.retentions.retention_for(&point.name);
        Some(
            MatchedMetric::new(point.name.clone(), point.value, point.timestamp, retention)
                .with_patterns(patterns.iter().cloned()),
        )
    }
}
