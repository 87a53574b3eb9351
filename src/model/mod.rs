//! Entities of the alerting platform and their JSON wire format
//!
//! Records never hold back-pointers to the index sets that reference
//! them; the database layer keeps both in one transaction.

pub mod check;
pub mod contact;
pub mod event;
pub mod metric;
pub mod schedule;
pub mod state;
pub mod trigger;

pub use check::{CheckData, MetricState};
pub use contact::{Contact, EmergencyContact, HeartbeatType, Owner, PlottingData, Subscription, Team};
pub use event::{NotificationEvent, NotificationEventHistoryItem, ScheduledNotification, TriggerData};
pub use metric::{MatchedMetric, MetricEvent, MetricValue};
pub use schedule::{ScheduleData, ScheduleDay};
pub use state::{State, TtlState};
pub use trigger::{Trigger, TriggerSource, TriggerType};

/// Entity invariant violations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("trigger name is empty")]
    EmptyName,

    #[error("trigger has no targets")]
    NoTargets,

    #[error("expression trigger has an empty expression")]
    EmptyExpression,

    #[error("neither warn_value nor error_value is set")]
    NoThresholds,

    #[error("{trigger_type} trigger needs ordered thresholds, got warn={warn} error={error}")]
    ThresholdOrder {
        trigger_type: &'static str,
        warn: f64,
        error: f64,
    },

    #[error("ttl must not be negative, got {0}")]
    InvalidTtl(i64),

    #[error("tag name is empty")]
    EmptyTag,

    #[error("subscription has no tags")]
    NoTags,

    #[error("{0} must belong to exactly one of user or team")]
    Owner(&'static str),

    #[error("emergency contact has no contact id")]
    EmptyContactId,

    #[error("emergency contact has no heartbeat types")]
    NoHeartbeatTypes,

    #[error("team name is empty")]
    EmptyTeamName,
}
