//! 2.8: partition-tagged key layout
//!
//! Keys read together in one transaction get a shared `{...}` tag so they
//! land on the same shard of a partitioned store.

use super::{move_keys, move_prefix, Migration, MigrationError, Version};
use crate::database::{keys, Database};

const LEGACY_TAG_TRIGGERS: &str = "moira-tag-triggers:";
const LEGACY_TAG_SUBSCRIPTIONS: &str = "moira-tag-subscriptions:";
const TAG_TRIGGERS: &str = "{moira-tag-triggers}:";
const TAG_SUBSCRIPTIONS: &str = "{moira-tag-subscriptions}:";

/// Single keys renamed as a whole: (legacy, tagged)
const RENAMED: [(&str, &str); 5] = [
    ("moira-triggers-list", keys::TRIGGERS_LIST),
    ("moira-local-triggers-list", keys::LOCAL_TRIGGERS_LIST),
    ("moira-remote-triggers-list", keys::REMOTE_TRIGGERS_LIST),
    ("moira-prometheus-triggers-list", keys::PROMETHEUS_TRIGGERS_LIST),
    ("moira-any-tags-subscriptions", keys::ANY_TAGS_SUBSCRIPTIONS),
];

pub struct ClusterKeys;

impl Migration for ClusterKeys {
    fn version(&self) -> Version {
        Version::new(2, 8)
    }

    fn description(&self) -> &'static str {
        "cluster key layout"
    }

    fn forward(&self, database: &Database) -> Result<(), MigrationError> {
        let store = database.store().as_ref();
        let renamed: Vec<(String, String)> = RENAMED
            .iter()
            .map(|(legacy, tagged)| (legacy.to_string(), tagged.to_string()))
            .collect();
        let mut moved = move_keys(store, &renamed)?;
        moved += move_prefix(store, LEGACY_TAG_TRIGGERS, TAG_TRIGGERS, &[])?;
        moved += move_prefix(store, LEGACY_TAG_SUBSCRIPTIONS, TAG_SUBSCRIPTIONS, &[])?;
        tracing::info!(moved, "Keys moved to the cluster layout");
        Ok(())
    }

    fn reverse(&self, database: &Database) -> Result<(), MigrationError> {
        let store = database.store().as_ref();
        move_prefix(store, TAG_TRIGGERS, LEGACY_TAG_TRIGGERS, &[])?;
        // the any-tags set shares the tag-subscriptions partition
        move_prefix(store, TAG_SUBSCRIPTIONS, LEGACY_TAG_SUBSCRIPTIONS, &[keys::ANY_TAGS_SUBSCRIPTIONS])?;
        let renamed: Vec<(String, String)> = RENAMED
            .iter()
            .map(|(legacy, tagged)| (tagged.to_string(), legacy.to_string()))
            .collect();
        move_keys(store, &renamed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing;
    use crate::store::testing::RecordingStore;
    use crate::store::{Clock, StoreExt};
    use std::sync::Arc;

    fn sorted(mut members: Vec<String>) -> Vec<String> {
        members.sort();
        members
    }

    fn seed_legacy(store: &RecordingStore) {
        store.sadd("moira-tag-subscriptions:tag1", &["sub-1", "sub-2", "sub-3"]).unwrap();
        store.sadd("moira-tag-triggers:tag1", &["t1"]).unwrap();
        store.sadd("moira-triggers-list", &["t1"]).unwrap();
        store.sadd("moira-any-tags-subscriptions", &["sub-9"]).unwrap();
    }

    fn check_forward(store: &RecordingStore) {
        assert!(!store.exists("moira-tag-subscriptions:tag1").unwrap());
        assert_eq!(
            sorted(store.smembers("{moira-tag-subscriptions}:tag1").unwrap()),
            vec!["sub-1", "sub-2", "sub-3"]
        );
        assert_eq!(store.smembers("{moira-tag-triggers}:tag1").unwrap(), vec!["t1"]);
        assert_eq!(store.smembers(keys::TRIGGERS_LIST).unwrap(), vec!["t1"]);
        assert_eq!(store.smembers(keys::ANY_TAGS_SUBSCRIPTIONS).unwrap(), vec!["sub-9"]);
        assert!(!store.exists("moira-triggers-list").unwrap());
        assert!(!store.exists("moira-any-tags-subscriptions").unwrap());
    }

    #[test]
    fn test_forward_renames_legacy_keys() {
        let (store, db) = testing::database(0);
        seed_legacy(&store);
        ClusterKeys.forward(&db).unwrap();
        check_forward(&store);
        assert_eq!(db.tag_trigger_ids("tag1").unwrap(), vec!["t1"]);

        // a second run finds nothing to move
        ClusterKeys.forward(&db).unwrap();
        check_forward(&store);
    }

    #[test]
    fn test_forward_on_partitioned_store() {
        let store = Arc::new(RecordingStore::with_shards(0, 8));
        let clock: Arc<dyn Clock> = store.clock();
        let db = Database::new(store.clone(), clock);
        seed_legacy(&store);
        ClusterKeys.forward(&db).unwrap();
        check_forward(&store);
    }

    #[test]
    fn test_reverse_restores_legacy_keys() {
        let (store, db) = testing::database(0);
        seed_legacy(&store);
        ClusterKeys.forward(&db).unwrap();
        ClusterKeys.reverse(&db).unwrap();

        assert_eq!(
            sorted(store.smembers("moira-tag-subscriptions:tag1").unwrap()),
            vec!["sub-1", "sub-2", "sub-3"]
        );
        assert_eq!(store.smembers("moira-any-tags-subscriptions").unwrap(), vec!["sub-9"]);
        assert!(!store.exists("moira-tag-subscriptions:moira-any-tags-subscriptions").unwrap());
        assert!(!store.exists(keys::ANY_TAGS_SUBSCRIPTIONS).unwrap());
        assert_eq!(store.smembers("moira-triggers-list").unwrap(), vec!["t1"]);
    }
}
