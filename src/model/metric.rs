//! Metric points and their sorted-set encoding

use serde::{Deserialize, Serialize};

/// A point matched by at least one pattern
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedMetric {
    pub metric: String,
    pub patterns: Vec<String>,
    pub value: f64,
    pub timestamp: i64,
    /// Timestamp rounded down to the retention step
    pub retention_timestamp: i64,
    /// Retention step, seconds
    pub retention: i64,
}

impl MatchedMetric {
    pub fn new(metric: impl Into<String>, value: f64, timestamp: i64, retention: i64) -> Self {
        Self {
            metric: metric.into(),
            patterns: Vec::new(),
            value,
            timestamp,
            retention_timestamp: retention_timestamp(timestamp, retention),
            retention,
        }
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

/// Round a timestamp down to its retention step
pub fn retention_timestamp(timestamp: i64, retention: i64) -> i64 {
    if retention <= 0 {
        return timestamp;
    }
    timestamp - timestamp.rem_euclid(retention)
}

/// A stored point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricValue {
    pub retention_timestamp: i64,
    pub timestamp: i64,
    pub value: f64,
}

/// Sorted-set member for a point: `"<ts> <value>"`
pub fn encode_point(timestamp: i64, value: f64) -> String {
    format!("{} {}", timestamp, value)
}

/// Decode a sorted-set member scored with its retention timestamp
pub fn decode_point(member: &str, score: f64) -> Option<MetricValue> {
    let (ts, value) = member.split_once(' ')?;
    Some(MetricValue {
        retention_timestamp: score as i64,
        timestamp: ts.parse().ok()?,
        value: value.parse().ok()?,
    })
}

/// Pub/sub payload announcing a matched metric
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricEvent {
    pub metric: String,
    pub pattern: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_encoding_keeps_precision() {
        let value = 0.1 + 0.2;
        let member = encode_point(1_700_000_000, value);
        let decoded = decode_point(&member, 1_699_999_980.0).unwrap();
        assert_eq!(decoded.value, value);
        assert_eq!(decoded.timestamp, 1_700_000_000);
        assert_eq!(decoded.retention_timestamp, 1_699_999_980);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_point("nope", 0.0).is_none());
        assert!(decode_point("1 x", 0.0).is_none());
    }

    #[test]
    fn test_retention_rounding() {
        assert_eq!(retention_timestamp(125, 60), 120);
        assert_eq!(retention_timestamp(120, 60), 120);
        assert_eq!(MatchedMetric::new("m", 1.0, 61, 60).retention_timestamp, 60);
    }
}
