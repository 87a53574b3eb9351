//! Contacts, subscriptions, teams and emergency contacts

use serde::{Deserialize, Serialize};

use super::schedule::ScheduleData;
use super::ValidationError;

/// Owner of a contact or subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    User(String),
    Team(String),
}

fn owner_of(kind: &'static str, user: &str, team: &str) -> Result<Owner, ValidationError> {
    match (user.is_empty(), team.is_empty()) {
        (false, true) => Ok(Owner::User(user.to_string())),
        (true, false) => Ok(Owner::Team(team.to_string())),
        _ => Err(ValidationError::Owner(kind)),
    }
}

/// Delivery address of a given channel type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(rename = "type")]
    pub contact_type: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "team_id")]
    pub team: String,
}

impl Contact {
    pub fn for_user(
        id: impl Into<String>,
        contact_type: impl Into<String>,
        value: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            contact_type: contact_type.into(),
            value: value.into(),
            user: user.into(),
            team: String::new(),
        }
    }

    pub fn for_team(
        id: impl Into<String>,
        contact_type: impl Into<String>,
        value: impl Into<String>,
        team: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            contact_type: contact_type.into(),
            value: value.into(),
            user: String::new(),
            team: team.into(),
        }
    }

    /// The single owner of the contact
    pub fn owner(&self) -> Result<Owner, ValidationError> {
        owner_of("contact", &self.user, &self.team)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlottingData {
    pub enabled: bool,
    #[serde(default)]
    pub theme: String,
}

/// Routing rule from trigger tags to contacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Match every trigger regardless of tags
    #[serde(default)]
    pub any_tags: bool,
    #[serde(default = "ScheduleData::default", rename = "sched")]
    pub schedule: ScheduleData,
    #[serde(default, rename = "throttling")]
    pub throttling_enabled: bool,
    #[serde(default)]
    pub ignore_warnings: bool,
    #[serde(default)]
    pub ignore_recoverings: bool,
    #[serde(default)]
    pub plotting: PlottingData,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "team_id")]
    pub team: String,
}

fn default_true() -> bool {
    true
}

impl Subscription {
    pub fn for_user(id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            contacts: Vec::new(),
            tags: Vec::new(),
            enabled: true,
            any_tags: false,
            schedule: ScheduleData::default(),
            throttling_enabled: true,
            ignore_warnings: false,
            ignore_recoverings: false,
            plotting: PlottingData::default(),
            user: user.into(),
            team: String::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_contacts<I, S>(mut self, contacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contacts = contacts.into_iter().map(Into::into).collect();
        self
    }

    pub fn owner(&self) -> Result<Owner, ValidationError> {
        owner_of("subscription", &self.user, &self.team)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.owner()?;
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ValidationError::EmptyTag);
        }
        if !self.any_tags && self.tags.is_empty() {
            return Err(ValidationError::NoTags);
        }
        Ok(())
    }
}

/// Team record. Names are unique case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Team {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
        }
    }

    /// Key of the name index
    pub fn folded_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Health check a contact can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatType {
    HeartbeatNotifierOff,
    HeartbeatTypeNotSet,
    HeartbeatFilter,
    HeartbeatLocalChecker,
    HeartbeatRemoteChecker,
    HeartbeatPrometheusChecker,
    HeartbeatDatabase,
}

impl HeartbeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatType::HeartbeatNotifierOff => "heartbeat_notifier_off",
            HeartbeatType::HeartbeatTypeNotSet => "heartbeat_type_not_set",
            HeartbeatType::HeartbeatFilter => "heartbeat_filter",
            HeartbeatType::HeartbeatLocalChecker => "heartbeat_local_checker",
            HeartbeatType::HeartbeatRemoteChecker => "heartbeat_remote_checker",
            HeartbeatType::HeartbeatPrometheusChecker => "heartbeat_prometheus_checker",
            HeartbeatType::HeartbeatDatabase => "heartbeat_database",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub contact_id: String,
    pub heartbeat_types: Vec<HeartbeatType>,
}

impl EmergencyContact {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.contact_id.is_empty() {
            return Err(ValidationError::EmptyContactId);
        }
        if self.heartbeat_types.is_empty() {
            return Err(ValidationError::NoHeartbeatTypes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_xor() {
        let contact = Contact::for_user("c", "mail", "a@b", "alice");
        assert_eq!(contact.owner().unwrap(), Owner::User("alice".into()));

        let mut both = contact.clone();
        both.team = "t".into();
        assert_eq!(both.owner(), Err(ValidationError::Owner("contact")));

        let mut neither = contact;
        neither.user.clear();
        assert!(neither.owner().is_err());
    }

    #[test]
    fn test_subscription_validation() {
        let sub = Subscription::for_user("s", "alice");
        assert_eq!(sub.validate(), Err(ValidationError::NoTags));

        let mut any = Subscription::for_user("s", "alice");
        any.any_tags = true;
        assert!(any.validate().is_ok());

        let tagged = Subscription::for_user("s", "alice").with_tags(["db"]);
        assert!(tagged.validate().is_ok());
    }

    #[test]
    fn test_contact_wire_format() {
        let contact = Contact::for_team("c", "webhook", "http://x", "team-1");
        let json = serde_json::to_value(&contact).unwrap();
        assert_eq!(json["type"], "webhook");
        assert_eq!(json["team_id"], "team-1");
        assert!(json.get("user").is_none());
    }
}
