//! Check states and their weights

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of a metric or a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum State {
    #[default]
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "NODATA")]
    NoData,
    #[serde(rename = "EXCEPTION")]
    Exception,
    #[serde(rename = "TEST")]
    Test,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Ok => "OK",
            State::Warn => "WARN",
            State::Error => "ERROR",
            State::NoData => "NODATA",
            State::Exception => "EXCEPTION",
            State::Test => "TEST",
        }
    }

    /// Contribution to a trigger's check score
    pub fn score(&self) -> i64 {
        match self {
            State::Ok | State::Test => 0,
            State::Warn => 1,
            State::Error => 100,
            State::NoData => 1000,
            State::Exception => 100_000,
        }
    }

    /// Weight used to classify a transition as progress or degradation.
    /// States outside the ordered scale have none.
    pub fn event_weight(&self) -> Option<i64> {
        match self {
            State::Ok => Some(0),
            State::Warn => Some(1),
            State::Error => Some(100),
            State::NoData => Some(10_000),
            State::Exception | State::Test => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(State::Ok),
            "WARN" => Ok(State::Warn),
            "ERROR" => Ok(State::Error),
            "NODATA" => Ok(State::NoData),
            "EXCEPTION" => Ok(State::Exception),
            "TEST" => Ok(State::Test),
            other => Err(format!("unknown state '{}'", other)),
        }
    }
}

/// State a metric falls into when it stops reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TtlState {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
    #[default]
    #[serde(rename = "NODATA")]
    NoData,
    /// Forget the metric
    #[serde(rename = "DEL")]
    Del,
}

impl TtlState {
    /// The state to assign, or `None` when the metric must be removed
    pub fn to_state(self) -> Option<State> {
        match self {
            TtlState::Ok => Some(State::Ok),
            TtlState::Warn => Some(State::Warn),
            TtlState::Error => Some(State::Error),
            TtlState::NoData => Some(State::NoData),
            TtlState::Del => None,
        }
    }
}

/// Tags describing a transition, matched against subscription tags
pub fn transition_tags(state: State, old_state: State) -> Vec<String> {
    let mut tags = vec![state.to_string(), old_state.to_string()];
    if let (Some(new), Some(old)) = (state.event_weight(), old_state.event_weight()) {
        if new < old {
            tags.push("PROGRESS".to_string());
        } else if new > old {
            tags.push("DEGRADATION".to_string());
            if new - old >= 100 {
                tags.push("HIGH DEGRADATION".to_string());
            }
        }
    }
    tags
}

/// Whether the transition moves toward a healthier state
pub fn is_recovering(state: State, old_state: State) -> bool {
    match (state.event_weight(), old_state.event_weight()) {
        (Some(new), Some(old)) => new < old,
        _ => false,
    }
}

/// Whether the transition only involves the warning level
pub fn is_warning_transition(state: State, old_state: State) -> bool {
    matches!(
        (state, old_state),
        (State::Warn, State::Ok) | (State::Ok, State::Warn)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_names() {
        assert_eq!(serde_json::to_string(&State::NoData).unwrap(), "\"NODATA\"");
        assert_eq!(serde_json::from_str::<TtlState>("\"DEL\"").unwrap(), TtlState::Del);
        assert_eq!("WARN".parse::<State>().unwrap(), State::Warn);
    }

    #[test]
    fn test_transition_tags() {
        let tags = transition_tags(State::Error, State::Ok);
        assert!(tags.contains(&"DEGRADATION".to_string()));
        assert!(tags.contains(&"HIGH DEGRADATION".to_string()));

        let tags = transition_tags(State::Warn, State::Ok);
        assert!(tags.contains(&"DEGRADATION".to_string()));
        assert!(!tags.contains(&"HIGH DEGRADATION".to_string()));

        let tags = transition_tags(State::Ok, State::NoData);
        assert_eq!(tags, vec!["OK", "NODATA", "PROGRESS"]);

        let tags = transition_tags(State::Exception, State::Ok);
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_recovery_and_warnings() {
        assert!(is_recovering(State::Ok, State::Error));
        assert!(!is_recovering(State::Error, State::Ok));
        assert!(is_warning_transition(State::Ok, State::Warn));
        assert!(!is_warning_transition(State::Error, State::Warn));
    }
}
