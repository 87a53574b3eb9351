use serde::{Deserialize, Serialize};

use super::schedule::ScheduleData;
use super::state::TtlState;
use super::ValidationError;

/// Default NODATA window in seconds
pub const DEFAULT_TTL: i64 = 600;

/// How a trigger turns values into states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// Higher is worse: `error > warn`
    Rising,
    /// Lower is worse: `error < warn`
    Falling,
    /// User expression decides
    Expression,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Rising => "rising",
            TriggerType::Falling => "falling",
            TriggerType::Expression => "expression",
        }
    }

    /// Type implied by thresholds and expression, for triggers saved
    /// before the type was stored
    pub fn infer(warn: Option<f64>, error: Option<f64>, expression: Option<&str>) -> Self {
        if expression.map(|e| !e.trim().is_empty()).unwrap_or(false) {
            return TriggerType::Expression;
        }
        match (warn, error) {
            (Some(warn), Some(error)) if warn > error => TriggerType::Falling,
            _ => TriggerType::Rising,
        }
    }
}

/// Which metric source evaluates the targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    #[default]
    Local,
    Remote,
    Prometheus,
}

impl TriggerSource {
    pub const ALL: [TriggerSource; 3] = [
        TriggerSource::Local,
        TriggerSource::Remote,
        TriggerSource::Prometheus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Local => "local",
            TriggerSource::Remote => "remote",
            TriggerSource::Prometheus => "prometheus",
        }
    }
}

/// Alerting rule over one or more targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub targets: Vec<String>,
    #[serde(default)]
    pub warn_value: Option<f64>,
    #[serde(default)]
    pub error_value: Option<f64>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ttl_state: TtlState,
    /// NODATA window, seconds. Zero disables NODATA detection.
    #[serde(default = "default_ttl")]
    pub ttl: i64,
    /// Hours during which state changes may raise events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub trigger_source: TriggerSource,
    /// Metrics appearing for the first time raise no event
    #[serde(default)]
    pub mute_new_metrics: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

fn default_ttl() -> i64 {
    DEFAULT_TTL
}

impl Trigger {
    /// Create a new rising trigger over a single target
    pub fn new(id: impl Into<String>, name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            desc: None,
            targets: vec![target.into()],
            warn_value: None,
            error_value: None,
            trigger_type: TriggerType::Rising,
            tags: Vec::new(),
            ttl_state: TtlState::NoData,
            ttl: DEFAULT_TTL,
            schedule: None,
            expression: None,
            patterns: Vec::new(),
            trigger_source: TriggerSource::Local,
            mute_new_metrics: false,
            updated_at: None,
        }
    }

    pub fn with_thresholds(mut self, warn: Option<f64>, error: Option<f64>) -> Self {
        self.warn_value = warn;
        self.error_value = error;
        self
    }

    pub fn with_type(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self.trigger_type = TriggerType::Expression;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: TriggerSource) -> Self {
        self.trigger_source = source;
        self
    }

    pub fn with_ttl(mut self, ttl: i64, ttl_state: TtlState) -> Self {
        self.ttl = ttl;
        self.ttl_state = ttl_state;
        self
    }

    /// Non-empty expression, if any
    pub fn expression(&self) -> Option<&str> {
        self.expression
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Check the trigger invariants, collapsing equal thresholds into a
    /// rising trigger without a warning level.
    pub fn normalize(&mut self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.targets.is_empty() || self.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ValidationError::NoTargets);
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ValidationError::EmptyTag);
        }
        if self.ttl < 0 {
            return Err(ValidationError::InvalidTtl(self.ttl));
        }

        match self.trigger_type {
            TriggerType::Expression => {
                if self.expression().is_none() {
                    return Err(ValidationError::EmptyExpression);
                }
            }
            TriggerType::Rising | TriggerType::Falling => match (self.warn_value, self.error_value) {
                (None, None) => return Err(ValidationError::NoThresholds),
                (Some(warn), Some(error)) if warn == error => {
                    self.trigger_type = TriggerType::Rising;
                    self.warn_value = None;
                }
                (Some(warn), Some(error)) => {
                    let ordered = match self.trigger_type {
                        TriggerType::Rising => error > warn,
                        _ => error < warn,
                    };
                    if !ordered {
                        return Err(ValidationError::ThresholdOrder {
                            trigger_type: self.trigger_type.as_str(),
                            warn,
                            error,
                        });
                    }
                }
                _ => {}
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_thresholds_collapse() {
        let mut trigger = Trigger::new("t", "name", "a.b")
            .with_type(TriggerType::Falling)
            .with_thresholds(Some(5.0), Some(5.0));
        trigger.normalize().unwrap();
        assert_eq!(trigger.trigger_type, TriggerType::Rising);
        assert_eq!(trigger.warn_value, None);
        assert_eq!(trigger.error_value, Some(5.0));
    }

    #[test]
    fn test_threshold_order() {
        let mut rising = Trigger::new("t", "n", "a").with_thresholds(Some(20.0), Some(10.0));
        assert!(matches!(
            rising.normalize(),
            Err(ValidationError::ThresholdOrder { .. })
        ));

        let mut falling = Trigger::new("t", "n", "a")
            .with_type(TriggerType::Falling)
            .with_thresholds(Some(20.0), Some(10.0));
        assert!(falling.normalize().is_ok());
    }

    #[test]
    fn test_expression_required() {
        let mut trigger = Trigger::new("t", "n", "a").with_expression("  ");
        assert_eq!(trigger.normalize(), Err(ValidationError::EmptyExpression));
    }

    #[test]
    fn test_missing_thresholds() {
        let mut trigger = Trigger::new("t", "n", "a");
        assert_eq!(trigger.normalize(), Err(ValidationError::NoThresholds));
    }

    #[test]
    fn test_infer_type() {
        assert_eq!(TriggerType::infer(Some(10.0), Some(20.0), Some("")), TriggerType::Rising);
        assert_eq!(TriggerType::infer(Some(20.0), Some(10.0), None), TriggerType::Falling);
        assert_eq!(
            TriggerType::infer(Some(20.0), Some(10.0), Some("t1>5")),
            TriggerType::Expression
        );
    }

    #[test]
    fn test_wire_defaults() {
        let json = r#"{"id":"t","name":"n","targets":["a.*"],"trigger_type":"rising","error_value":1}"#;
        let trigger: Trigger = serde_json::from_str(json).unwrap();
        assert_eq!(trigger.ttl, DEFAULT_TTL);
        assert_eq!(trigger.ttl_state, TtlState::NoData);
        assert_eq!(trigger.trigger_source, TriggerSource::Local);
    }
}
