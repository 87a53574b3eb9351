//! Delivery channels

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{ConfigError, SenderConfig};
use crate::model::{Contact, NotificationEvent, PlottingData, TriggerData};

/// Sender errors
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Worth retrying later
    #[error("send failed: {0}")]
    Failed(String),

    /// The contact cannot be delivered to; retrying is pointless
    #[error("broken contact: {0}")]
    BrokenContact(String),
}

/// Events of one trigger going to one contact in one delivery
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPackage {
    pub contact: Contact,
    pub trigger: TriggerData,
    pub events: Vec<NotificationEvent>,
    pub throttled: bool,
    pub plotting: PlottingData,
    /// Link to the trigger page
    pub trigger_uri: String,
}

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, package: &NotificationPackage) -> Result<(), SendError>;
}

/// Writes notifications to the process log
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(&self, package: &NotificationPackage) -> Result<(), SendError> {
        for event in &package.events {
            tracing::warn!(
                contact_id = %package.contact.id,
                trigger_id = %package.trigger.id,
                trigger_name = %package.trigger.name,
                metric = %event.metric,
                state = %event.state,
                old_state = %event.old_state,
                throttled = package.throttled,
                "Notification"
            );
        }
        Ok(())
    }
}

/// POSTs the package as JSON
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookSender {
    /// Create a new webhook sender
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SendError::Failed(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Sender for WebhookSender {
    async fn send(&self, package: &NotificationPackage) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.url)
            .json(package)
            .send()
            .await
            .map_err(|e| SendError::Failed(format!("failed to send webhook: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                contact_id = %package.contact.id,
                url = %self.url,
                "Webhook notification sent"
            );
            return Ok(());
        }
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SendError::BrokenContact(format!("webhook returned status {}", status)));
        }
        Err(SendError::Failed(format!("webhook returned status {}", status)))
    }
}

/// Senders by contact type
#[derive(Default, Clone)]
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[SenderConfig]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for config in configs {
            let sender: Arc<dyn Sender> = match config.kind.as_str() {
                "log" => Arc::new(LogSender),
                "webhook" => {
                    let url = config.url.clone().ok_or_else(|| {
                        ConfigError::Invalid(format!("webhook sender for {} needs a url", config.contact_type))
                    })?;
                    let sender = WebhookSender::new(url, Duration::from_secs(config.timeout_secs))
                        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                    Arc::new(sender)
                }
                other => {
                    return Err(ConfigError::Invalid(format!("unknown sender kind {}", other)));
                }
            };
            registry.register(config.contact_type.clone(), sender);
        }
        Ok(registry)
    }

    pub fn register(&mut self, contact_type: impl Into<String>, sender: Arc<dyn Sender>) {
        self.senders.insert(contact_type.into(), sender);
    }

    pub fn get(&self, contact_type: &str) -> Option<&Arc<dyn Sender>> {
        self.senders.get(contact_type)
    }

    pub fn contact_types(&self) -> impl Iterator<Item = &str> {
        self.senders.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::State;

    fn package() -> NotificationPackage {
        NotificationPackage {
            contact: Contact::for_user("c1", "log", "ops", "u1"),
            trigger: TriggerData {
                id: "t1".into(),
                name: "cpu".into(),
                ..Default::default()
            },
            events: vec![NotificationEvent::new("t1", "m", State::Error, State::Ok, 100)],
            throttled: false,
            plotting: PlottingData::default(),
            trigger_uri: "http://localhost/trigger/t1".into(),
        }
    }

    #[tokio::test]
    async fn test_log_sender() {
        assert!(LogSender.send(&package()).await.is_ok());
    }

    #[test]
    fn test_registry_from_config() {
        let registry = SenderRegistry::from_config(&[
            SenderConfig {
                contact_type: "log".into(),
                kind: "log".into(),
                url: None,
                timeout_secs: 1,
            },
            SenderConfig {
                contact_type: "slack".into(),
                kind: "webhook".into(),
                url: Some("http://127.0.0.1:9/hook".into()),
                timeout_secs: 1,
            },
        ])
        .unwrap();
        assert!(registry.get("log").is_some());
        assert!(registry.get("slack").is_some());
        assert!(registry.get("email").is_none());

        let missing_url = SenderRegistry::from_config(&[SenderConfig {
            contact_type: "slack".into(),
            kind: "webhook".into(),
            url: None,
            timeout_secs: 1,
        }]);
        assert!(matches!(missing_url, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_package_payload() {
        let json = serde_json::to_value(package()).unwrap();
        assert_eq!(json["contact"]["type"], "log");
        assert_eq!(json["events"][0]["state"], "ERROR");
        assert_eq!(json["trigger"]["id"], "t1");
    }
}
