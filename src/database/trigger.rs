//! Trigger records and their index sets

use std::collections::HashSet;

use super::keys;
use super::{decode_reply, diff, Database, DbError};
use crate::model::{Trigger, TriggerSource};
use crate::store::{Pipeline, ScoreRange, StoreExt};

fn source_list(source: TriggerSource) -> &'static str {
    match source {
        TriggerSource::Local => keys::LOCAL_TRIGGERS_LIST,
        TriggerSource::Remote => keys::REMOTE_TRIGGERS_LIST,
        TriggerSource::Prometheus => keys::PROMETHEUS_TRIGGERS_LIST,
    }
}

impl Database {
    pub fn get_trigger(&self, id: &str) -> Result<Trigger, DbError> {
        self.get_json(&keys::trigger(id))
    }

    /// Triggers in the order of `ids`, `None` for missing ones
    pub fn get_triggers(&self, ids: &[String]) -> Result<Vec<Option<Trigger>>, DbError> {
        let mut pipe = Pipeline::new();
        for id in ids {
            pipe.get(keys::trigger(id));
        }
        self.exec(pipe)?.into_iter().map(decode_reply).collect()
    }

    /// Validate and store a trigger, updating every index it appears in
    pub fn save_trigger(&self, mut trigger: Trigger) -> Result<Trigger, DbError> {
        trigger.normalize()?;
        let old = match self.get_trigger(&trigger.id) {
            Ok(old) => Some(old),
            Err(DbError::Nil) => None,
            Err(e) => return Err(e),
        };
        let now = self.now();
        trigger.updated_at = Some(now);

        let id = trigger.id.as_str();
        let mut pipe = Pipeline::new();
        pipe.set(keys::trigger(id), Self::to_json(&trigger)?);
        pipe.sadd(keys::TRIGGERS_LIST, id);
        for source in TriggerSource::ALL {
            if source == trigger.trigger_source {
                pipe.sadd(source_list(source), id);
            } else {
                pipe.srem(source_list(source), id);
            }
        }

        let (old_tags, old_patterns) = old
            .as_ref()
            .map(|o| (o.tags.clone(), o.patterns.clone()))
            .unwrap_or_default();

        let (removed_tags, _) = diff(&old_tags, &trigger.tags);
        for tag in removed_tags {
            pipe.srem(keys::tag_triggers(tag), id);
        }
        pipe.del(keys::trigger_tags(id));
        if !trigger.tags.is_empty() {
            pipe.sadd_many(keys::trigger_tags(id), trigger.tags.iter().cloned());
            pipe.sadd_many(keys::TAGS, trigger.tags.iter().cloned());
        }
        for tag in &trigger.tags {
            pipe.sadd(keys::tag_triggers(tag), id);
        }

        let (removed_patterns, _) = diff(&old_patterns, &trigger.patterns);
        for pattern in &removed_patterns {
            pipe.srem(keys::pattern_triggers(pattern), id);
        }
        for pattern in &trigger.patterns {
            pipe.sadd(keys::pattern_triggers(pattern), id);
            pipe.sadd(keys::PATTERN_LIST, pattern.as_str());
        }
        pipe.zadd(keys::TRIGGERS_TO_REINDEX, now as f64, id);
        self.exec(pipe)?;

        for pattern in removed_patterns {
            self.remove_pattern_if_unused(pattern)?;
        }

        tracing::debug!(trigger_id = %trigger.id, "Trigger saved");
        Ok(trigger)
    }

    /// Remove a trigger with its check data, throttling state and index
    /// entries. Removing a missing trigger is not an error.
    pub fn remove_trigger(&self, id: &str) -> Result<(), DbError> {
        let trigger = match self.get_trigger(id) {
            Ok(trigger) => trigger,
            Err(DbError::Nil) => return Ok(()),
            Err(e) => return Err(e),
        };

        // One DEL per key, the keys live on different slots in cluster mode
        let mut pipe = Pipeline::new();
        for key in [
            keys::trigger(id),
            keys::trigger_tags(id),
            keys::last_check(id),
            keys::notifier_next(id),
            keys::throttling_beginning(id),
            keys::trigger_events(id),
        ] {
            pipe.del(key);
        }
        pipe.srem(keys::TRIGGERS_LIST, id);
        for source in TriggerSource::ALL {
            pipe.srem(source_list(source), id);
        }
        for tag in &trigger.tags {
            pipe.srem(keys::tag_triggers(tag), id);
        }
        for pattern in &trigger.patterns {
            pipe.srem(keys::pattern_triggers(pattern), id);
        }
        pipe.zrem(keys::TRIGGERS_CHECKS, id);
        pipe.srem(keys::BAD_STATE_TRIGGERS, id);
        pipe.zadd(keys::TRIGGERS_TO_REINDEX, self.now() as f64, id);
        self.exec(pipe)?;

        for pattern in &trigger.patterns {
            self.remove_pattern_if_unused(pattern)?;
        }
        tracing::debug!(trigger_id = %id, "Trigger removed");
        Ok(())
    }

    /// Trigger ids, optionally restricted to one source
    pub fn trigger_ids(&self, source: Option<TriggerSource>) -> Result<Vec<String>, DbError> {
        let key = source.map(source_list).unwrap_or(keys::TRIGGERS_LIST);
        Ok(self.store.smembers(key)?)
    }

    pub fn pattern_trigger_ids(&self, pattern: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::pattern_triggers(pattern))?)
    }

    pub fn tag_trigger_ids(&self, tag: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::tag_triggers(tag))?)
    }

    /// Triggers carrying every one of `tags`
    pub fn tags_triggers_intersection(&self, tags: &[String]) -> Result<Vec<String>, DbError> {
        let mut result: Option<HashSet<String>> = None;
        for tag in tags {
            let ids: HashSet<String> = self.tag_trigger_ids(tag)?.into_iter().collect();
            result = Some(match result {
                Some(acc) => acc.intersection(&ids).cloned().collect(),
                None => ids,
            });
        }
        let mut ids: Vec<String> = result.unwrap_or_default().into_iter().collect();
        ids.sort();
        Ok(ids)
    }

    /// Queue a trigger for search reindexing
    pub fn mark_dirty_for_reindex(&self, id: &str) -> Result<(), DbError> {
        self.store
            .zadd(keys::TRIGGERS_TO_REINDEX, self.now() as f64, id)?;
        Ok(())
    }

    /// Triggers marked dirty at or after `ts`
    pub fn fetch_dirty_since(&self, ts: i64) -> Result<Vec<String>, DbError> {
        let entries =
            self.store
                .zrange_by_score(keys::TRIGGERS_TO_REINDEX, ScoreRange::from(ts as f64), None)?;
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }

    /// Forget dirty marks at or before `ts`
    pub fn remove_dirty_up_to(&self, ts: i64) -> Result<i64, DbError> {
        Ok(self
            .store
            .zrem_range_by_score(keys::TRIGGERS_TO_REINDEX, ScoreRange::up_to(ts as f64))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::model::ValidationError;

    fn trigger(id: &str) -> Trigger {
        Trigger::new(id, "cpu", "servers.*.cpu")
            .with_thresholds(Some(10.0), Some(20.0))
            .with_tags(["prod", "cpu"])
            .with_patterns(["servers.*.cpu"])
    }

    #[test]
    fn test_save_and_read_back() {
        let (_store, db) = database(1_000);
        let saved = db.save_trigger(trigger("t1")).unwrap();
        assert_eq!(db.get_trigger("t1").unwrap(), saved);

        assert_eq!(db.tag_trigger_ids("prod").unwrap(), vec!["t1"]);
        assert_eq!(db.pattern_trigger_ids("servers.*.cpu").unwrap(), vec!["t1"]);
        assert_eq!(db.trigger_ids(Some(TriggerSource::Local)).unwrap(), vec!["t1"]);
        assert!(db.trigger_ids(Some(TriggerSource::Remote)).unwrap().is_empty());
        assert_eq!(db.fetch_dirty_since(1_000).unwrap(), vec!["t1"]);
    }

    #[test]
    fn test_resave_moves_indexes() {
        let (_store, db) = database(1_000);
        db.save_trigger(trigger("t1")).unwrap();

        let updated = trigger("t1")
            .with_tags(["prod", "mem"])
            .with_patterns(["servers.*.mem"])
            .with_source(TriggerSource::Remote);
        db.save_trigger(updated).unwrap();

        assert!(db.tag_trigger_ids("cpu").unwrap().is_empty());
        assert_eq!(db.tag_trigger_ids("mem").unwrap(), vec!["t1"]);
        assert!(db.pattern_trigger_ids("servers.*.cpu").unwrap().is_empty());
        assert!(db.trigger_ids(Some(TriggerSource::Local)).unwrap().is_empty());
        assert_eq!(db.trigger_ids(Some(TriggerSource::Remote)).unwrap(), vec!["t1"]);
        assert!(!db.patterns().unwrap().contains(&"servers.*.cpu".to_string()));
    }

    #[test]
    fn test_invalid_trigger_rejected() {
        let (_store, db) = database(1_000);
        let bad = Trigger::new("t1", "cpu", "a").with_thresholds(Some(20.0), Some(10.0));
        assert!(matches!(
            db.save_trigger(bad),
            Err(DbError::Validation(ValidationError::ThresholdOrder { .. }))
        ));
        assert!(db.get_trigger("t1").unwrap_err().is_nil());
    }

    #[test]
    fn test_equal_thresholds_saved_as_rising() {
        let (_store, db) = database(1_000);
        let t = Trigger::new("t1", "cpu", "a").with_thresholds(Some(5.0), Some(5.0));
        let saved = db.save_trigger(t).unwrap();
        assert_eq!(saved.warn_value, None);
    }

    #[test]
    fn test_remove_trigger() {
        let (_store, db) = database(1_000);
        db.save_trigger(trigger("t1")).unwrap();
        db.save_trigger(trigger("t2")).unwrap();
        db.remove_trigger("t1").unwrap();

        assert!(db.get_trigger("t1").unwrap_err().is_nil());
        assert_eq!(db.tag_trigger_ids("prod").unwrap(), vec!["t2"]);
        assert_eq!(db.trigger_ids(None).unwrap(), vec!["t2"]);
        db.remove_trigger("missing").unwrap();
    }

    #[test]
    fn test_tag_intersection() {
        let (_store, db) = database(1_000);
        db.save_trigger(trigger("t1")).unwrap();
        db.save_trigger(trigger("t2").with_tags(["prod"])).unwrap();
        assert_eq!(
            db.tags_triggers_intersection(&["prod".into(), "cpu".into()]).unwrap(),
            vec!["t1"]
        );
    }

    #[test]
    fn test_dirty_window() {
        let (store, db) = database(1_000);
        db.mark_dirty_for_reindex("a").unwrap();
        store.clock().set_secs(2_000);
        db.mark_dirty_for_reindex("b").unwrap();

        assert_eq!(db.fetch_dirty_since(1_500).unwrap(), vec!["b"]);
        db.remove_dirty_up_to(1_500).unwrap();
        assert_eq!(db.fetch_dirty_since(0).unwrap(), vec!["b"]);
    }

    #[test]
    fn test_get_many() {
        let (_store, db) = database(1_000);
        db.save_trigger(trigger("t1")).unwrap();
        let got = db.get_triggers(&["t1".into(), "nope".into()]).unwrap();
        assert!(got[0].is_some());
        assert!(got[1].is_none());
    }
}
