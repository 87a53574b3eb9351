//! Key namespace
//!
//! Keys used together in a multi-key transaction share a `{...}`
//! partition tag.

pub const TRIGGERS_LIST: &str = "{moira-triggers-list}:moira-triggers-list";
pub const LOCAL_TRIGGERS_LIST: &str = "{moira-triggers-list}:moira-local-triggers-list";
pub const REMOTE_TRIGGERS_LIST: &str = "{moira-triggers-list}:moira-remote-triggers-list";
pub const PROMETHEUS_TRIGGERS_LIST: &str = "{moira-triggers-list}:moira-prometheus-triggers-list";

pub const PATTERN_LIST: &str = "moira-pattern-list";
pub const TRIGGERS_CHECKS: &str = "moira-triggers-checks";
pub const BAD_STATE_TRIGGERS: &str = "moira-bad-state-triggers";
pub const CHECKS_COUNTER: &str = "moira-selfstate:checks-counter";
pub const TAGS: &str = "moira-tags";
pub const ANY_TAGS_SUBSCRIPTIONS: &str = "{moira-tag-subscriptions}:moira-any-tags-subscriptions";

pub const TRIGGER_EVENTS: &str = "moira-trigger-events";
pub const NOTIFIER_NOTIFICATIONS: &str = "moira-notifier-notifications";
pub const FAILED_NOTIFICATIONS: &str = "moira-notifier-failed-notifications";
pub const CONTACT_NOTIFICATIONS: &str = "moira-contact-notifications";
pub const TRIGGERS_TO_REINDEX: &str = "moira-triggers-to-reindex";

pub const TEAMS: &str = "moira-teams";
pub const TEAMS_BY_NAMES: &str = "moira-teams-by-names";

pub const TELEGRAM_USERS_PREFIX: &str = "moira-telegram-users:";
pub const TELEGRAM_LOCK_PREFIX: &str = "moira-telegram-users:moira-bot-host";

/// Pub/sub channel of matched metrics
pub const METRIC_EVENT_CHANNEL: &str = "metric-event";

pub fn trigger(id: &str) -> String {
    format!("moira-trigger:{}", id)
}

pub fn trigger_tags(id: &str) -> String {
    format!("moira-trigger-tags:{}", id)
}

pub fn pattern_triggers(pattern: &str) -> String {
    format!("moira-pattern-triggers:{}", pattern)
}

pub fn metric_data(metric: &str) -> String {
    format!("moira-metric-data:{}", metric)
}

pub fn metric_retention(metric: &str) -> String {
    format!("moira-metric-retention:{}", metric)
}

pub fn pattern_metrics(pattern: &str) -> String {
    format!("moira-pattern-metrics:{}", pattern)
}

pub fn last_check(trigger_id: &str) -> String {
    format!("moira-metric-last-check:{}", trigger_id)
}

pub fn tag_triggers(tag: &str) -> String {
    format!("{{moira-tag-triggers}}:{}", tag)
}

pub fn tag_subscriptions(tag: &str) -> String {
    format!("{{moira-tag-subscriptions}}:{}", tag)
}

pub fn subscription(id: &str) -> String {
    format!("moira-subscription:{}", id)
}

pub fn user_subscriptions(user: &str) -> String {
    format!("moira-user-subscriptions:{}", user)
}

pub fn team_subscriptions(team: &str) -> String {
    format!("moira-team-subscriptions:{}", team)
}

pub fn contact(id: &str) -> String {
    format!("moira-contact:{}", id)
}

pub fn user_contacts(user: &str) -> String {
    format!("moira-user-contacts:{}", user)
}

pub fn team_contacts(team: &str) -> String {
    format!("moira-team-contacts:{}", team)
}

pub fn contact_notifications(contact_id: &str) -> String {
    format!("{}:{}", CONTACT_NOTIFICATIONS, contact_id)
}

pub fn trigger_events(trigger_id: &str) -> String {
    format!("{}:{}", TRIGGER_EVENTS, trigger_id)
}

pub fn notifier_next(trigger_id: &str) -> String {
    format!("moira-notifier-next:{}", trigger_id)
}

pub fn throttling_beginning(trigger_id: &str) -> String {
    format!("moira-notifier-throttling-beginning:{}", trigger_id)
}

pub fn check_lock(trigger_id: &str) -> String {
    format!("moira-metric-check-lock:{}", trigger_id)
}

pub fn service_registration(name: &str) -> String {
    format!("moira-service-registration:{}", name)
}

pub fn team_users(team_id: &str) -> String {
    format!("moira-team-users:{}", team_id)
}

pub fn user_teams(user: &str) -> String {
    format!("moira-user-teams:{}", user)
}

pub fn emergency_contact(contact_id: &str) -> String {
    format!("moira-emergency-contacts:{}", contact_id)
}

pub fn heartbeat_type_contacts(heartbeat_type: &str) -> String {
    format!("moira-heartbeat-type-contacts:{}", heartbeat_type)
}

pub fn delivery_check(contact_type: &str) -> String {
    format!("moira-delivery-check:{}", contact_type)
}

pub fn search_results(pager_id: &str) -> String {
    format!("moira-search-results:{}", pager_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::partitioner::hash_tag;

    #[test]
    fn test_transaction_groups_share_tags() {
        assert_eq!(hash_tag(TRIGGERS_LIST), hash_tag(PROMETHEUS_TRIGGERS_LIST));
        assert_eq!(hash_tag(&tag_subscriptions("db")), hash_tag(ANY_TAGS_SUBSCRIPTIONS));
        assert_eq!(hash_tag(&tag_triggers("a")), hash_tag(&tag_triggers("b")));
        assert_eq!(tag_triggers("x"), "{moira-tag-triggers}:x");
    }
}
