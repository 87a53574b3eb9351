use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::state::State;

/// Per-metric outcome of a check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricState {
    pub state: State,
    /// When the state last changed
    #[serde(default)]
    pub event_timestamp: i64,
    /// Set when a state change raised no event
    #[serde(default)]
    pub suppressed: bool,
    /// Timestamp of the value the state was computed from
    #[serde(default)]
    pub timestamp: i64,
    /// Unix seconds until which the metric is muted
    #[serde(default)]
    pub maintenance: i64,
    /// Target values, keyed `t1`, `t2`, ...
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl MetricState {
    pub fn in_maintenance(&self, now: i64) -> bool {
        self.maintenance > now
    }
}

/// Result of the most recent evaluation of a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckData {
    #[serde(default)]
    pub score: i64,
    pub state: State,
    pub timestamp: i64,
    /// Trigger-level state change time
    #[serde(default)]
    pub event_timestamp: i64,
    /// Unix seconds until which the whole trigger is muted
    #[serde(default)]
    pub maintenance: i64,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricState>,
    #[serde(default)]
    pub last_successful_check_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckData {
    /// Check data of a trigger that was never evaluated
    pub fn initial(now: i64) -> Self {
        Self {
            score: 0,
            state: State::NoData,
            timestamp: now,
            event_timestamp: 0,
            maintenance: 0,
            metrics: BTreeMap::new(),
            last_successful_check_timestamp: 0,
            message: None,
        }
    }

    pub fn in_maintenance(&self, now: i64) -> bool {
        self.maintenance > now
    }

    /// Whether the trigger or the given metric is muted at `now`
    pub fn metric_in_maintenance(&self, metric: &str, now: i64) -> bool {
        self.in_maintenance(now)
            || self
                .metrics
                .get(metric)
                .map(|m| m.in_maintenance(now))
                .unwrap_or(false)
    }

    /// Recompute the score from the metric states and the trigger state
    pub fn update_score(&mut self) {
        let metrics: i64 = self.metrics.values().map(|m| m.state.score()).sum();
        let trigger = match self.state {
            State::Exception | State::NoData if self.metrics.is_empty() => self.state.score(),
            State::Exception => self.state.score(),
            _ => 0,
        };
        self.score = metrics + trigger;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score() {
        let mut check = CheckData::initial(100);
        check.state = State::Ok;
        check.metrics.insert(
            "a".into(),
            MetricState {
                state: State::Error,
                ..Default::default()
            },
        );
        check.metrics.insert(
            "b".into(),
            MetricState {
                state: State::Warn,
                ..Default::default()
            },
        );
        check.update_score();
        assert_eq!(check.score, 101);

        check.state = State::Exception;
        check.update_score();
        assert_eq!(check.score, 100_101);
    }

    #[test]
    fn test_empty_nodata_scores() {
        let mut check = CheckData::initial(0);
        check.update_score();
        assert_eq!(check.score, State::NoData.score());
    }

    #[test]
    fn test_maintenance() {
        let mut check = CheckData::initial(0);
        check.metrics.insert(
            "m".into(),
            MetricState {
                maintenance: 50,
                ..Default::default()
            },
        );
        assert!(check.metric_in_maintenance("m", 49));
        assert!(!check.metric_in_maintenance("m", 50));
        assert!(!check.metric_in_maintenance("other", 10));

        check.maintenance = 100;
        assert!(check.metric_in_maintenance("other", 10));
    }
}
