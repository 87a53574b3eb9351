//! Notification events, scheduled notifications and history

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::contact::{Contact, PlottingData};
use super::state::{transition_tags, State};
use super::trigger::Trigger;

/// State transition raised by the checker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub timestamp: i64,
    /// Empty for trigger-level events
    #[serde(default)]
    pub metric: String,
    pub state: State,
    pub old_state: State,
    pub trigger_id: String,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Restricts delivery to one subscription
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub is_trigger_event: bool,
}

impl NotificationEvent {
    pub fn new(
        trigger_id: impl Into<String>,
        metric: impl Into<String>,
        state: State,
        old_state: State,
        timestamp: i64,
    ) -> Self {
        Self {
            timestamp,
            metric: metric.into(),
            state,
            old_state,
            trigger_id: trigger_id.into(),
            values: BTreeMap::new(),
            subscription_id: None,
            message: None,
            is_trigger_event: false,
        }
    }

    /// Tags of this transition, see [`transition_tags`]
    pub fn tags(&self) -> Vec<String> {
        transition_tags(self.state, self.old_state)
    }
}

/// Trigger fields carried inside a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TriggerData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub warn_value: Option<f64>,
    #[serde(default)]
    pub error_value: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<&Trigger> for TriggerData {
    fn from(trigger: &Trigger) -> Self {
        Self {
            id: trigger.id.clone(),
            name: trigger.name.clone(),
            desc: trigger.desc.clone().unwrap_or_default(),
            targets: trigger.targets.clone(),
            warn_value: trigger.warn_value,
            error_value: trigger.error_value,
            tags: trigger.tags.clone(),
        }
    }
}

/// Notification waiting in the delivery queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub event: NotificationEvent,
    pub trigger: TriggerData,
    pub contact: Contact,
    #[serde(default)]
    pub plotting: PlottingData,
    #[serde(default)]
    pub throttled: bool,
    #[serde(default)]
    pub send_fail: u32,
    /// Send time, Unix seconds
    pub timestamp: i64,
    #[serde(default)]
    pub created_at: i64,
}

/// Record of one delivered event, kept per contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEventHistoryItem {
    pub timestamp: i64,
    #[serde(default)]
    pub metric: String,
    pub state: State,
    pub old_state: State,
    pub trigger_id: String,
    pub contact_id: String,
}

impl NotificationEventHistoryItem {
    pub fn from_event(event: &NotificationEvent, contact_id: impl Into<String>) -> Self {
        Self {
            timestamp: event.timestamp,
            metric: event.metric.clone(),
            state: event.state,
            old_state: event.old_state,
            trigger_id: event.trigger_id.clone(),
            contact_id: contact_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = NotificationEvent::new("t1", "cpu.load", State::Error, State::Ok, 100);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["state"], "ERROR");
        assert_eq!(json["old_state"], "OK");
        assert!(json.get("subscription_id").is_none());
    }

    #[test]
    fn test_history_item_from_event() {
        let event = NotificationEvent::new("t1", "m", State::Warn, State::Ok, 42);
        let item = NotificationEventHistoryItem::from_event(&event, "c1");
        assert_eq!(item.contact_id, "c1");
        assert_eq!(item.timestamp, 42);
        assert_eq!(item.state, State::Warn);
    }
}
