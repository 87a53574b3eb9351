//! Fan-out of checker events to subscribed contacts

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use super::scheduler::NotificationScheduler;
use crate::database::{Database, DbError};
use crate::model::state::{is_recovering, is_warning_transition};
use crate::model::{NotificationEvent, Subscription, TriggerData};

pub struct EventProcessor {
    database: Arc<Database>,
    scheduler: NotificationScheduler,
}

impl EventProcessor {
    /// Create a new event processor
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            scheduler: NotificationScheduler::new(database.clone()),
            database,
        }
    }

    /// Queue one notification per contact subscribed to the event.
    /// Returns how many were queued.
    pub fn process(&self, event: &NotificationEvent) -> Result<usize, DbError> {
        let trigger = match self.database.get_trigger(&event.trigger_id) {
            Ok(trigger) => trigger,
            Err(DbError::Nil) => {
                tracing::warn!(trigger_id = %event.trigger_id, "Event for a removed trigger");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        let trigger_data = TriggerData::from(&trigger);

        let subscriptions = match &event.subscription_id {
            Some(id) => match self.database.get_subscription(id) {
                Ok(subscription) => vec![subscription],
                Err(DbError::Nil) => Vec::new(),
                Err(e) => return Err(e),
            },
            None => {
                let mut tags: BTreeSet<String> = trigger.tags.iter().cloned().collect();
                tags.extend(event.tags());
                let tags: Vec<String> = tags.into_iter().collect();
                self.database
                    .tags_subscriptions(&trigger.tags)?
                    .into_iter()
                    .filter(|s| s.any_tags || s.tags.iter().all(|t| tags.contains(t)))
                    .collect()
            }
        };

        let mut seen_contacts = HashSet::new();
        let mut notifications = Vec::new();
        for subscription in subscriptions {
            if !accepts(&subscription, event) {
                continue;
            }
            let contacts = self.database.get_contacts(&subscription.contacts)?;
            for contact in contacts.into_iter().flatten() {
                if !seen_contacts.insert(contact.id.clone()) {
                    continue;
                }
                let mut event = event.clone();
                event.subscription_id = Some(subscription.id.clone());
                notifications.push(self.scheduler.schedule(&event, &trigger_data, &contact, &subscription, 0)?);
            }
        }

        self.database.add_notifications(&notifications)?;
        if !notifications.is_empty() {
            tracing::debug!(
                trigger_id = %event.trigger_id,
                metric = %event.metric,
                notifications = notifications.len(),
                "Event scheduled"
            );
        }
        Ok(notifications.len())
    }
}

/// Whether the subscription wants this transition
fn accepts(subscription: &Subscription, event: &NotificationEvent) -> bool {
    if !subscription.enabled {
        return false;
    }
    if subscription.ignore_warnings && is_warning_transition(event.state, event.old_state) {
        return false;
    }
    if subscription.ignore_recoverings && is_recovering(event.state, event.old_state) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::model::{Contact, State, Trigger};

    fn setup() -> (Arc<Database>, EventProcessor) {
        let (_store, db) = database(1_000);
        let db = Arc::new(db);
        db.save_trigger(
            Trigger::new("t1", "cpu", "a.b")
                .with_thresholds(Some(1.0), Some(2.0))
                .with_tags(["prod", "db"]),
        )
        .unwrap();
        db.save_contact(&Contact::for_user("c1", "log", "ops", "u1")).unwrap();
        db.save_contact(&Contact::for_user("c2", "log", "dev", "u1")).unwrap();
        (db.clone(), EventProcessor::new(db))
    }

    #[test]
    fn test_fan_out_matches_tag_subsets() {
        let (db, processor) = setup();
        let mut matching = Subscription::for_user("s1", "u1").with_tags(["prod"]).with_contacts(["c1"]);
        matching.throttling_enabled = false;
        db.save_subscription(&matching).unwrap();
        db.save_subscription(
            &Subscription::for_user("s2", "u1")
                .with_tags(["prod", "web"])
                .with_contacts(["c2"]),
        )
        .unwrap();
        db.save_subscription(
            &Subscription::for_user("s3", "u1")
                .with_tags(["db", "ERROR"])
                .with_contacts(["c1", "c2"]),
        )
        .unwrap();

        let event = NotificationEvent::new("t1", "m", State::Error, State::Ok, 990);
        assert_eq!(processor.process(&event).unwrap(), 2);

        let queued = db.get_notifications().unwrap();
        let mut contacts: Vec<_> = queued.iter().map(|n| n.contact.id.as_str()).collect();
        contacts.sort();
        assert_eq!(contacts, vec!["c1", "c2"]);
        assert!(queued.iter().all(|n| n.timestamp == 990));
        assert!(queued.iter().all(|n| n.trigger.tags.contains(&"prod".to_string())));
    }

    #[test]
    fn test_ignore_flags_and_disabled() {
        let (db, processor) = setup();
        let mut subscription = Subscription::for_user("s1", "u1").with_tags(["prod"]).with_contacts(["c1"]);
        subscription.ignore_warnings = true;
        subscription.ignore_recoverings = true;
        db.save_subscription(&subscription).unwrap();

        let warn = NotificationEvent::new("t1", "m", State::Warn, State::Ok, 990);
        assert_eq!(processor.process(&warn).unwrap(), 0);
        let recovery = NotificationEvent::new("t1", "m", State::Ok, State::Error, 990);
        assert_eq!(processor.process(&recovery).unwrap(), 0);
        let error = NotificationEvent::new("t1", "m", State::Error, State::Ok, 990);
        assert_eq!(processor.process(&error).unwrap(), 1);

        subscription.enabled = false;
        db.save_subscription(&subscription).unwrap();
        assert_eq!(processor.process(&error).unwrap(), 0);
    }

    #[test]
    fn test_event_bound_to_subscription() {
        let (db, processor) = setup();
        db.save_subscription(&Subscription::for_user("s1", "u1").with_tags(["other"]).with_contacts(["c2"]))
            .unwrap();

        let mut event = NotificationEvent::new("t1", "", State::Test, State::Test, 990);
        event.subscription_id = Some("s1".into());
        assert_eq!(processor.process(&event).unwrap(), 1);
        assert_eq!(db.get_notifications().unwrap()[0].contact.id, "c2");
    }

    #[test]
    fn test_removed_trigger_is_skipped() {
        let (_db, processor) = setup();
        let event = NotificationEvent::new("gone", "m", State::Error, State::Ok, 990);
        assert_eq!(processor.process(&event).unwrap(), 0);
    }
}
