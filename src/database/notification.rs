//! Event queue, scheduled-notification queue and delivery history

use std::collections::HashMap;
use std::time::Duration;

use super::keys;
use super::{Database, DbError};
use crate::model::{NotificationEvent, NotificationEventHistoryItem, ScheduledNotification};
use crate::store::{Limit, Pipeline, ScoreRange, StoreExt};

/// Per-trigger event counters are kept for this long, seconds
const TRIGGER_EVENTS_WINDOW: i64 = 3 * 60 * 60;

/// Above this limit a short queue is drained without WATCH
const LARGE_FETCH_LIMIT: usize = 10_000;

/// How many due notifications one fetch may return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchLimit {
    Unlimited,
    Bounded(usize),
}

impl FetchLimit {
    /// `-1` (or any non-positive value) means unlimited
    pub fn from_config(limit: i64) -> Self {
        if limit > 0 {
            FetchLimit::Bounded(limit as usize)
        } else {
            FetchLimit::Unlimited
        }
    }
}

impl Database {
    /// Queue an event for the notifier and count it against its trigger
    pub fn push_event(&self, event: &NotificationEvent) -> Result<(), DbError> {
        let raw = Self::to_json(event)?;
        let counter = keys::trigger_events(&event.trigger_id);

        let mut pipe = Pipeline::new();
        pipe.lpush(keys::TRIGGER_EVENTS, raw.as_str());
        pipe.zadd(counter.as_str(), event.timestamp as f64, raw);
        pipe.zrem_range_by_score(
            counter,
            ScoreRange::up_to((self.now() - TRIGGER_EVENTS_WINDOW) as f64),
        );
        self.exec(pipe)?;
        Ok(())
    }

    /// Oldest queued event, if any
    pub fn fetch_event(&self) -> Result<Option<NotificationEvent>, DbError> {
        match self.store.rpop(keys::TRIGGER_EVENTS)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn add_notification(&self, notification: &ScheduledNotification) -> Result<(), DbError> {
        self.add_notifications(std::slice::from_ref(notification))
    }

    pub fn add_notifications(&self, notifications: &[ScheduledNotification]) -> Result<(), DbError> {
        let mut pipe = Pipeline::new();
        for notification in notifications {
            pipe.zadd(
                keys::NOTIFIER_NOTIFICATIONS,
                notification.timestamp as f64,
                Self::to_json(notification)?,
            );
        }
        self.exec(pipe)?;
        Ok(())
    }

    /// Every queued notification, due or not
    pub fn get_notifications(&self) -> Result<Vec<ScheduledNotification>, DbError> {
        let raw = self
            .store
            .zrange_by_score(keys::NOTIFIER_NOTIFICATIONS, ScoreRange::all(), None)?;
        Ok(decode_notifications(raw))
    }

    pub fn remove_notification(&self, notification: &ScheduledNotification) -> Result<bool, DbError> {
        let member = Self::to_json(notification)?;
        Ok(self.store.zrem(keys::NOTIFIER_NOTIFICATIONS, &[member.as_str()])? > 0)
    }

    /// Take notifications due at the current time off the queue.
    ///
    /// A bounded fetch never splits a group of notifications sharing a
    /// timestamp: the group is left for the next call, or taken whole when
    /// it alone fills the limit.
    pub fn fetch_notifications(&self, limit: FetchLimit) -> Result<Vec<ScheduledNotification>, DbError> {
        let now = self.now();
        let raw = match limit {
            FetchLimit::Unlimited => self.fetch_unlimited(now as f64)?,
            FetchLimit::Bounded(limit) if limit > LARGE_FETCH_LIMIT => {
                let queued = self
                    .store
                    .zcount(keys::NOTIFIER_NOTIFICATIONS, ScoreRange::all())?;
                if (queued as usize) < limit / 2 {
                    self.fetch_unlimited(now as f64)?
                } else {
                    self.fetch_bounded(now, limit)?
                }
            }
            FetchLimit::Bounded(limit) => self.fetch_bounded(now, limit)?,
        };
        self.drop_delayed_in_maintenance(decode_notifications(raw), now)
    }

    fn fetch_unlimited(&self, to: f64) -> Result<Vec<(String, f64)>, DbError> {
        let mut pipe = Pipeline::new();
        pipe.zrange_by_score(keys::NOTIFIER_NOTIFICATIONS, ScoreRange::up_to(to), None);
        pipe.zrem_range_by_score(keys::NOTIFIER_NOTIFICATIONS, ScoreRange::up_to(to));
        match self.exec(pipe)?.into_iter().next() {
            Some(reply) => Ok(reply.into_scored()?),
            None => Ok(Vec::new()),
        }
    }

    fn fetch_bounded(&self, now: i64, limit: usize) -> Result<Vec<(String, f64)>, DbError> {
        for attempt in 0..self.options.transaction_retries {
            let token = self.store.watch(&[keys::NOTIFIER_NOTIFICATIONS])?;
            let mut fetched = self.store.zrange_by_score(
                keys::NOTIFIER_NOTIFICATIONS,
                ScoreRange::up_to(now as f64),
                Some(Limit::first(limit)),
            )?;
            if fetched.is_empty() {
                return Ok(fetched);
            }

            let bound = if fetched.len() < limit {
                now as f64
            } else {
                let last = fetched[fetched.len() - 1].1;
                fetched.retain(|(_, score)| *score != last);
                match fetched.last() {
                    Some((_, score)) => *score,
                    None => {
                        drop(token);
                        return self.fetch_unlimited(last);
                    }
                }
            };

            let mut pipe = Pipeline::new();
            pipe.zrem_range_by_score(keys::NOTIFIER_NOTIFICATIONS, ScoreRange::up_to(bound));
            match self.store.exec_watched(token, pipe)? {
                Some(replies) => {
                    for reply in replies {
                        reply.check()?;
                    }
                    return Ok(fetched);
                }
                None => {
                    tracing::debug!(attempt, "Notification fetch conflicted, retrying");
                    std::thread::sleep(self.options.transaction_backoff);
                }
            }
        }
        Err(DbError::TransactionRetryLimit)
    }

    /// Delayed notifications of triggers in maintenance are dropped
    fn drop_delayed_in_maintenance(
        &self,
        notifications: Vec<ScheduledNotification>,
        now: i64,
    ) -> Result<Vec<ScheduledNotification>, DbError> {
        if notifications.is_empty() {
            return Ok(notifications);
        }
        let mut trigger_ids: Vec<String> = notifications
            .iter()
            .map(|n| n.trigger.id.clone())
            .collect();
        trigger_ids.sort();
        trigger_ids.dedup();
        let checks: HashMap<String, _> = trigger_ids
            .iter()
            .cloned()
            .zip(self.get_last_checks(&trigger_ids)?)
            .filter_map(|(id, check)| check.map(|c| (id, c)))
            .collect();

        let threshold = self.options.delayed_threshold;
        Ok(notifications
            .into_iter()
            .filter(|n| {
                let Some(check) = checks.get(&n.trigger.id) else {
                    return true;
                };
                let delayed = check.last_successful_check_timestamp - n.timestamp > threshold;
                if delayed && check.metric_in_maintenance(&n.event.metric, now) {
                    tracing::info!(
                        trigger_id = %n.trigger.id,
                        metric = %n.event.metric,
                        "Dropping delayed notification in maintenance"
                    );
                    return false;
                }
                true
            })
            .collect())
    }

    /// Append delivered events to their contacts' histories
    pub fn push_history(&self, items: &[NotificationEventHistoryItem]) -> Result<(), DbError> {
        let mut pipe = Pipeline::new();
        for item in items {
            pipe.zadd(
                keys::contact_notifications(&item.contact_id),
                item.timestamp as f64,
                Self::to_json(item)?,
            );
        }
        self.exec(pipe)?;
        Ok(())
    }

    /// History of one contact with timestamps in `[from, to]`
    pub fn contact_history(
        &self,
        contact_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<NotificationEventHistoryItem>, DbError> {
        let raw = self.store.zrange_by_score(
            &keys::contact_notifications(contact_id),
            ScoreRange::between(from as f64, to as f64),
            None,
        )?;
        Ok(raw
            .into_iter()
            .filter_map(|(member, _)| serde_json::from_str(&member).ok())
            .collect())
    }

    /// Keep a notification that was given up on
    pub fn record_failed_notification(&self, notification: &ScheduledNotification) -> Result<(), DbError> {
        self.store.zadd(
            keys::FAILED_NOTIFICATIONS,
            self.now() as f64,
            &Self::to_json(notification)?,
        )?;
        Ok(())
    }

    /// Drop failed notifications recorded more than `max_age` ago. Returns
    /// the number removed.
    pub fn trim_failed_notifications(&self, max_age: Duration) -> Result<i64, DbError> {
        let cutoff = self.now() - max_age.as_secs() as i64;
        Ok(self
            .store
            .zrem_range_by_score(keys::FAILED_NOTIFICATIONS, ScoreRange::up_to(cutoff as f64))?)
    }

    pub fn failed_notifications(&self) -> Result<Vec<ScheduledNotification>, DbError> {
        let raw = self
            .store
            .zrange_by_score(keys::FAILED_NOTIFICATIONS, ScoreRange::all(), None)?;
        Ok(decode_notifications(raw))
    }
}

fn decode_notifications(raw: Vec<(String, f64)>) -> Vec<ScheduledNotification> {
    raw.into_iter()
        .filter_map(|(member, _)| match serde_json::from_str(&member) {
            Ok(notification) => Some(notification),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed notification");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::database::DatabaseOptions;
    use crate::model::{CheckData, Contact, State, TriggerData};
    use crate::store::{
        ChannelReceiver, Clock, ManualClock, MemoryStore, Reply, Store, StoreError, WatchToken,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn notification(metric: &str, ts: i64) -> ScheduledNotification {
        ScheduledNotification {
            event: NotificationEvent::new("t1", metric, State::Error, State::Ok, ts),
            trigger: TriggerData {
                id: "t1".into(),
                name: "cpu".into(),
                ..Default::default()
            },
            contact: Contact::for_user("c1", "mail", "ops@example.com", "alice"),
            plotting: Default::default(),
            throttled: false,
            send_fail: 0,
            timestamp: ts,
            created_at: ts,
        }
    }

    fn metrics(notifications: &[ScheduledNotification]) -> Vec<String> {
        let mut names: Vec<String> = notifications.iter().map(|n| n.event.metric.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_bounded_fetch_keeps_timestamp_groups() {
        let (store, db) = database(3);
        db.add_notifications(&[
            notification("a", 1),
            notification("b", 2),
            notification("c1", 3),
            notification("c2", 3),
            notification("c3", 3),
        ])
        .unwrap();

        let first = db.fetch_notifications(FetchLimit::Bounded(3)).unwrap();
        assert_eq!(metrics(&first), vec!["a", "b"]);
        assert_eq!(store.zcard(keys::NOTIFIER_NOTIFICATIONS).unwrap(), 3);

        let second = db.fetch_notifications(FetchLimit::Bounded(3)).unwrap();
        assert_eq!(metrics(&second), vec!["c1", "c2", "c3"]);
        assert_eq!(store.zcard(keys::NOTIFIER_NOTIFICATIONS).unwrap(), 0);
    }

    #[test]
    fn test_bounded_fetch_short_queue() {
        let (store, db) = database(10);
        db.add_notifications(&[notification("a", 5), notification("late", 20)])
            .unwrap();

        let fetched = db.fetch_notifications(FetchLimit::Bounded(5)).unwrap();
        assert_eq!(metrics(&fetched), vec!["a"]);
        assert_eq!(store.zcard(keys::NOTIFIER_NOTIFICATIONS).unwrap(), 1);
    }

    #[test]
    fn test_empty_queue_issues_no_removal() {
        let (store, db) = database(10);
        assert!(db.fetch_notifications(FetchLimit::Bounded(5)).unwrap().is_empty());
        let commands = store.commands();
        assert!(!commands.contains(&"DEL"));
        assert!(!commands.contains(&"ZREMRANGEBYSCORE"));
    }

    #[test]
    fn test_unlimited_fetch() {
        let (_store, db) = database(10);
        db.add_notifications(&[notification("a", 1), notification("b", 10), notification("c", 11)])
            .unwrap();
        let fetched = db.fetch_notifications(FetchLimit::Unlimited).unwrap();
        assert_eq!(metrics(&fetched), vec!["a", "b"]);
        assert_eq!(db.get_notifications().unwrap().len(), 1);
    }

    #[test]
    fn test_large_limit_on_short_queue_skips_watch() {
        let (store, db) = database(10);
        db.add_notification(&notification("a", 1)).unwrap();
        let fetched = db.fetch_notifications(FetchLimit::Bounded(20_000)).unwrap();
        assert_eq!(fetched.len(), 1);
        assert!(!store.commands().contains(&"WATCH"));
    }

    #[test]
    fn test_delayed_notification_in_maintenance_dropped() {
        let (_store, db) = database(1_000);
        let mut check = CheckData::initial(1_000);
        check.last_successful_check_timestamp = 1_000;
        check.maintenance = 2_000;
        db.set_last_check("t1", &check).unwrap();

        db.add_notifications(&[notification("old", 100), notification("fresh", 990)])
            .unwrap();
        let fetched = db.fetch_notifications(FetchLimit::Unlimited).unwrap();
        assert_eq!(metrics(&fetched), vec!["fresh"]);
    }

    #[test]
    fn test_event_queue_is_fifo() {
        let (store, db) = database(100);
        let first = NotificationEvent::new("t1", "m", State::Error, State::Ok, 90);
        let second = NotificationEvent::new("t1", "m", State::Ok, State::Error, 95);
        db.push_event(&first).unwrap();
        db.push_event(&second).unwrap();

        assert_eq!(db.fetch_event().unwrap(), Some(first));
        assert_eq!(db.fetch_event().unwrap(), Some(second));
        assert_eq!(db.fetch_event().unwrap(), None);
        assert_eq!(db.event_count_since("t1", 0).unwrap(), 2);

        // Counters older than the window are trimmed on the next push
        store.clock().set_secs(100 + TRIGGER_EVENTS_WINDOW);
        let later = NotificationEvent::new("t1", "m", State::Error, State::Ok, 100 + TRIGGER_EVENTS_WINDOW);
        db.push_event(&later).unwrap();
        assert_eq!(db.event_count_since("t1", 0).unwrap(), 1);
    }

    #[test]
    fn test_history_per_contact() {
        let (_store, db) = database(100);
        let event = NotificationEvent::new("t1", "m", State::Error, State::Ok, 50);
        db.push_history(&[
            NotificationEventHistoryItem::from_event(&event, "c1"),
            NotificationEventHistoryItem::from_event(&event, "c2"),
        ])
        .unwrap();

        let history = db.contact_history("c1", 0, 100).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].contact_id, "c1");
    }

    #[test]
    fn test_trim_failed_notifications() {
        let (store, db) = database(1_000);
        db.record_failed_notification(&notification("old", 900)).unwrap();
        store.clock().advance(Duration::from_secs(7_200));
        db.record_failed_notification(&notification("new", 8_000)).unwrap();

        assert_eq!(db.trim_failed_notifications(Duration::from_secs(3_600)).unwrap(), 1);
        let left = db.failed_notifications().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].timestamp, 8_000);
        assert_eq!(db.trim_failed_notifications(Duration::from_secs(3_600)).unwrap(), 0);
    }

    /// Store whose notification queue changes between every WATCH and EXEC
    struct InterferingStore {
        inner: MemoryStore,
    }

    impl Store for InterferingStore {
        fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>, StoreError> {
            self.inner.exec(pipeline)
        }

        fn watch(&self, keys: &[&str]) -> Result<WatchToken, StoreError> {
            let token = self.inner.watch(keys)?;
            let mut pipe = Pipeline::new();
            pipe.zadd(keys::NOTIFIER_NOTIFICATIONS, 1e12, uuid::Uuid::new_v4().to_string());
            self.inner.exec(pipe)?;
            Ok(token)
        }

        fn exec_watched(
            &self,
            token: WatchToken,
            pipeline: Pipeline,
        ) -> Result<Option<Vec<Reply>>, StoreError> {
            self.inner.exec_watched(token, pipeline)
        }

        fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), StoreError> {
            self.inner.scan(cursor, pattern, count)
        }

        fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
            self.inner.publish(channel, message)
        }

        fn subscribe(&self, channel: &str) -> Result<ChannelReceiver, StoreError> {
            self.inner.subscribe(channel)
        }
    }

    #[test]
    fn test_conflicts_exhaust_retries() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_secs(10));
        let store = Arc::new(InterferingStore {
            inner: MemoryStore::with_clock(clock.clone()),
        });
        let db = Database::with_options(
            store,
            clock,
            DatabaseOptions {
                transaction_backoff: Duration::from_millis(1),
                ..Default::default()
            },
        );
        db.add_notification(&notification("a", 1)).unwrap();

        assert!(matches!(
            db.fetch_notifications(FetchLimit::Bounded(5)),
            Err(DbError::TransactionRetryLimit)
        ));
        // Nothing was lost
        assert_eq!(db.get_notifications().unwrap().len(), 1);
    }
}
