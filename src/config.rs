//! YAML configuration shared by the daemon and the maintenance tool

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::database::{DatabaseOptions, FetchLimit};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub log: LogConfig,
    pub filter: FilterConfig,
    pub checker: CheckerConfig,
    pub notifier: NotifierConfig,
    pub search: SearchConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of shards; more than one enables cluster key-slot rules
    pub shards: usize,
    /// Snapshot file; no persistence when unset
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
    pub expiry_interval_ms: u64,
    /// In-process cache of metric retentions
    pub retention_cache_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: 1,
            snapshot_path: Some(PathBuf::from("moira.snapshot")),
            snapshot_interval_secs: 60,
            expiry_interval_ms: 1000,
            retention_cache_ttl_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level used when RUST_LOG is not set
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Retention step applied to metrics whose name matches a regex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionRule {
    pub pattern: String,
    pub retention_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Graphite plaintext listener
    pub listen: String,
    /// First matching rule wins
    pub retentions: Vec<RetentionRule>,
    pub default_retention_secs: i64,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    /// How long a metric matching no pattern is remembered as unknown
    pub unknown_metric_ttl_secs: u64,
    pub patterns_refresh_secs: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "0.0.0.0:2003".to_string(),
            retentions: Vec::new(),
            default_retention_secs: 60,
            batch_size: 1000,
            batch_timeout_ms: 200,
            unknown_metric_ttl_secs: 60,
            patterns_refresh_secs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub enabled: bool,
    pub workers: usize,
    pub nodata_check_interval_secs: u64,
    /// Minimum time between two checks of one trigger
    pub check_interval_secs: u64,
    pub lock_attempts: u32,
    pub lease_ttl_secs: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: num_cpus::get(),
            nodata_check_interval_secs: 60,
            check_interval_secs: 10,
            lock_attempts: 1,
            lease_ttl_secs: 30,
        }
    }
}

/// Sender bound to a contact type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderConfig {
    pub contact_type: String,
    /// `log` or `webhook`
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_sender_timeout")]
    pub timeout_secs: u64,
}

fn default_sender_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub fetch_interval_ms: u64,
    /// Non-positive means unlimited
    pub fetch_limit: i64,
    pub max_fail_attempts: u32,
    pub resend_delay_secs: i64,
    /// Notifications older than their trigger's last successful check by
    /// more than this are delayed
    pub delayed_threshold_secs: i64,
    pub front_uri: String,
    pub senders: Vec<SenderConfig>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fetch_interval_ms: 1000,
            fetch_limit: -1,
            max_fail_attempts: 3,
            resend_delay_secs: 60,
            delayed_threshold_secs: 60,
            front_uri: "http://localhost".to_string(),
            senders: vec![SenderConfig {
                contact_type: "log".to_string(),
                kind: "log".to_string(),
                url: None,
                timeout_secs: default_sender_timeout(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub reindex_interval_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reindex_interval_secs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Points older than this are removed
    pub metrics_max_age_secs: u64,
    /// Notifications that exhausted their delivery attempts are kept this long
    pub failed_notifications_max_age_secs: u64,
    pub batch_size: usize,
    /// Users kept by the user cleanup
    pub whitelist: Vec<String>,
    /// Delete non-whitelisted users' data instead of disabling it
    pub delete: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60 * 60,
            metrics_max_age_secs: 7 * 24 * 60 * 60,
            failed_notifications_max_age_secs: 30 * 24 * 60 * 60,
            batch_size: 1000,
            whitelist: Vec::new(),
            delete: false,
        }
    }
}

const SENDER_KINDS: &[&str] = &["log", "webhook"];

impl Config {
    /// Read and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults rendered as YAML
    pub fn default_yaml() -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(&Config::default())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.shards == 0 {
            return Err(ConfigError::Invalid("store.shards must be positive".into()));
        }
        if self.checker.enabled && self.checker.workers == 0 {
            return Err(ConfigError::Invalid("checker.workers must be positive".into()));
        }
        if self.filter.enabled && self.filter.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("filter.listen is empty".into()));
        }
        if self.filter.default_retention_secs <= 0 {
            return Err(ConfigError::Invalid(
                "filter.default_retention_secs must be positive".into(),
            ));
        }
        for rule in &self.filter.retentions {
            if rule.retention_secs <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "retention of {} must be positive",
                    rule.pattern
                )));
            }
            regex::Regex::new(&rule.pattern).map_err(|e| {
                ConfigError::Invalid(format!("bad retention pattern {}: {}", rule.pattern, e))
            })?;
        }
        for sender in &self.notifier.senders {
            if !SENDER_KINDS.contains(&sender.kind.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "unknown sender kind {} for contact type {}",
                    sender.kind, sender.contact_type
                )));
            }
            if sender.kind == "webhook" && sender.url.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "webhook sender for {} needs a url",
                    sender.contact_type
                )));
            }
        }
        Ok(())
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            retention_cache_ttl: Duration::from_secs(self.store.retention_cache_ttl_secs),
            delayed_threshold: self.notifier.delayed_threshold_secs,
            ..Default::default()
        }
    }

    pub fn fetch_limit(&self) -> FetchLimit {
        FetchLimit::from_config(self.notifier.fetch_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_round_trip_through_yaml() {
        let yaml = Config::default_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "notifier:\n  fetch_limit: 500\nlog:\n  level: debug").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.fetch_limit(), FetchLimit::Bounded(500));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.filter.default_retention_secs, 60);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            Config::from_yaml("checker:\n  workers: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("filter:\n  default_retention_secs: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("notifier:\n  senders:\n    - contact_type: mail\n      kind: smtp"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("notifier:\n  senders:\n    - contact_type: hook\n      kind: webhook"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(Config::from_yaml("store: ["), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load(Path::new("/nonexistent/moira.yml")),
            Err(ConfigError::Io(_))
        ));
    }
}
