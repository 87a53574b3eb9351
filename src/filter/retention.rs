use regex::Regex;

use crate::config::{ConfigError, RetentionRule};

/// Maps metric names to their retention step
#[derive(Debug)]
pub struct RetentionRules {
    rules: Vec<(Regex, i64)>,
    default: i64,
}

impl RetentionRules {
    pub fn new(rules: &[RetentionRule], default: i64) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.retention_secs))
                    .map_err(|e| ConfigError::Invalid(format!("retention pattern {}: {}", rule.pattern, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules, default })
    }

    /// Retention of the first matching rule, else the default
    pub fn retention_for(&self, metric: &str) -> i64 {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(metric))
            .map(|(_, retention)| *retention)
            .unwrap_or(self.default)
    }
}
