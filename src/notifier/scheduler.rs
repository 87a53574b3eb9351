//! Send-time calculation: subscription schedule and trigger throttling

use std::sync::Arc;

use crate::database::{Database, DbError};
use crate::model::{Contact, NotificationEvent, ScheduledNotification, Subscription, TriggerData};

/// A trigger raising at least `events` events within `window` seconds has
/// its notifications deferred by `delay` seconds. Checked in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlingLevel {
    pub window: i64,
    pub events: i64,
    pub delay: i64,
}

pub const THROTTLING_LEVELS: [ThrottlingLevel; 2] = [
    ThrottlingLevel {
        window: 3 * 60 * 60,
        events: 20,
        delay: 60 * 60,
    },
    ThrottlingLevel {
        window: 60 * 60,
        events: 10,
        delay: 30 * 60,
    },
];

/// Builds scheduled notifications for fanned-out events
pub struct NotificationScheduler {
    database: Arc<Database>,
}

impl NotificationScheduler {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Notification of `event` for `contact`, due at the first instant the
    /// subscription's schedule and the trigger's throttling allow
    pub fn schedule(
        &self,
        event: &NotificationEvent,
        trigger: &TriggerData,
        contact: &Contact,
        subscription: &Subscription,
        send_fail: u32,
    ) -> Result<ScheduledNotification, DbError> {
        let now = self.database.now();
        let (mut timestamp, throttled) = if subscription.throttling_enabled {
            self.throttled_time(event, now)?
        } else {
            (event.timestamp, false)
        };

        match subscription.schedule.next_allowed(timestamp) {
            Some(allowed) => timestamp = allowed,
            None => tracing::warn!(
                subscription_id = %subscription.id,
                "Subscription schedule allows no delivery within a week"
            ),
        }

        Ok(ScheduledNotification {
            event: event.clone(),
            trigger: trigger.clone(),
            contact: contact.clone(),
            plotting: subscription.plotting.clone(),
            throttled,
            send_fail,
            timestamp,
            created_at: now,
        })
    }

    /// Send time after throttling. A deferral in force wins; otherwise the
    /// levels are checked against the events counted since the current
    /// streak began, and the first one exceeded starts a deferral.
    fn throttled_time(&self, event: &NotificationEvent, now: i64) -> Result<(i64, bool), DbError> {
        let throttling = self.database.get_throttling(&event.trigger_id)?;
        if throttling.next > now {
            return Ok((event.timestamp.max(throttling.next), true));
        }

        for level in THROTTLING_LEVELS {
            let from = (now - level.window).max(throttling.beginning);
            let count = self.database.event_count_since(&event.trigger_id, from)?;
            if count >= level.events {
                let next = now + level.delay;
                self.database.set_throttling_next(&event.trigger_id, next)?;
                tracing::info!(
                    trigger_id = %event.trigger_id,
                    events = count,
                    until = next,
                    "Trigger switched to throttling"
                );
                return Ok((event.timestamp.max(next), true));
            }
        }
        Ok((event.timestamp, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::model::{ScheduleDay, State};

    // 2024-01-01 00:00:00 UTC, a Monday
    const MONDAY: i64 = 1_704_067_200;

    fn fixtures() -> (NotificationEvent, TriggerData, Contact, Subscription) {
        let event = NotificationEvent::new("t1", "m", State::Error, State::Ok, MONDAY);
        let trigger = TriggerData {
            id: "t1".into(),
            name: "cpu".into(),
            ..Default::default()
        };
        let contact = Contact::for_user("c1", "log", "ops", "u1");
        let subscription = Subscription::for_user("s1", "u1").with_tags(["prod"]);
        (event, trigger, contact, subscription)
    }

    #[test]
    fn test_immediate_delivery() {
        let (_store, db) = database(MONDAY + 10);
        let scheduler = NotificationScheduler::new(Arc::new(db));
        let (event, trigger, contact, subscription) = fixtures();

        let n = scheduler.schedule(&event, &trigger, &contact, &subscription, 0).unwrap();
        assert_eq!(n.timestamp, MONDAY);
        assert!(!n.throttled);
        assert_eq!(n.created_at, MONDAY + 10);
    }

    #[test]
    fn test_past_next_sends_now() {
        let (_store, db) = database(MONDAY + 10);
        db.set_throttling_next("t1", MONDAY - 100).unwrap();
        let scheduler = NotificationScheduler::new(Arc::new(db));
        let (event, trigger, contact, subscription) = fixtures();

        let n = scheduler.schedule(&event, &trigger, &contact, &subscription, 0).unwrap();
        assert_eq!(n.timestamp, MONDAY);
        assert!(!n.throttled);
    }

    #[test]
    fn test_deferral_in_force() {
        let (_store, db) = database(MONDAY + 10);
        db.set_throttling_next("t1", MONDAY + 600).unwrap();
        let scheduler = NotificationScheduler::new(Arc::new(db));
        let (event, trigger, contact, mut subscription) = fixtures();

        let n = scheduler.schedule(&event, &trigger, &contact, &subscription, 0).unwrap();
        assert_eq!(n.timestamp, MONDAY + 600);
        assert!(n.throttled);

        subscription.throttling_enabled = false;
        let n = scheduler.schedule(&event, &trigger, &contact, &subscription, 0).unwrap();
        assert_eq!(n.timestamp, MONDAY);
        assert!(!n.throttled);
    }

    #[test]
    fn test_event_flood_starts_throttling() {
        let (_store, db) = database(MONDAY);
        for i in 0..10 {
            db.push_event(&NotificationEvent::new("t1", "m", State::Error, State::Ok, MONDAY - 60 * i))
                .unwrap();
        }
        let db = Arc::new(db);
        let scheduler = NotificationScheduler::new(db.clone());
        let (event, trigger, contact, subscription) = fixtures();

        let n = scheduler.schedule(&event, &trigger, &contact, &subscription, 0).unwrap();
        assert!(n.throttled);
        assert_eq!(n.timestamp, MONDAY + 30 * 60);
        assert_eq!(db.get_throttling("t1").unwrap().next, MONDAY + 30 * 60);

        // a reset starts a new streak and the old events stop counting
        db.delete_throttling("t1").unwrap();
        let n = scheduler.schedule(&event, &trigger, &contact, &subscription, 0).unwrap();
        assert!(!n.throttled);
    }

    #[test]
    fn test_schedule_moves_send_time() {
        let (_store, db) = database(MONDAY);
        let scheduler = NotificationScheduler::new(Arc::new(db));
        let (event, trigger, contact, mut subscription) = fixtures();
        subscription.schedule.days[0] = ScheduleDay {
            enabled: false,
            name: "Mon".into(),
        };

        let n = scheduler.schedule(&event, &trigger, &contact, &subscription, 0).unwrap();
        // Tuesday 00:00
        assert_eq!(n.timestamp, MONDAY + 24 * 60 * 60);
    }
}
