//! 2.12: per-contact notification history
//!
//! Delivered events used to share one sorted set. Forward splits it into
//! one set per contact, reverse merges the sets back.

use super::{scan_keys, Migration, MigrationError, Version};
use crate::database::{keys, Database};
use crate::model::NotificationEventHistoryItem;
use crate::store::{Pipeline, Store, StoreExt};

/// Members moved per pipeline
const BATCH: usize = 1_000;

pub struct HistorySplit;

fn flush(store: &dyn Store, pipe: &mut Pipeline) -> Result<(), MigrationError> {
    if pipe.is_empty() {
        return Ok(());
    }
    for reply in store.exec(std::mem::take(pipe))? {
        reply.check()?;
    }
    Ok(())
}

/// Split the shared history into per-contact sets. Returns moved events.
pub fn split_history(database: &Database) -> Result<usize, MigrationError> {
    let store = database.store().as_ref();
    let entries = store.zrange(keys::CONTACT_NOTIFICATIONS, 0, -1)?;
    if entries.is_empty() {
        return Ok(0);
    }

    let mut moved = 0;
    let mut skipped = 0;
    let mut pipe = Pipeline::new();
    for (member, score) in entries {
        let item: NotificationEventHistoryItem = match serde_json::from_str(&member) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed history item");
                skipped += 1;
                continue;
            }
        };
        pipe.zadd(keys::contact_notifications(&item.contact_id), score, member.as_str());
        pipe.zrem(keys::CONTACT_NOTIFICATIONS, member);
        moved += 1;
        if pipe.len() >= BATCH {
            flush(store, &mut pipe)?;
        }
    }
    // Malformed members stay in the shared set for manual inspection
    if skipped == 0 {
        pipe.del(keys::CONTACT_NOTIFICATIONS);
    } else {
        tracing::warn!(skipped, key = keys::CONTACT_NOTIFICATIONS, "Legacy history kept");
    }
    flush(store, &mut pipe)?;
    Ok(moved)
}

/// Merge per-contact histories back into the shared set. Returns moved
/// events.
pub fn merge_history(database: &Database) -> Result<usize, MigrationError> {
    let store = database.store().as_ref();
    let pattern = keys::contact_notifications("*");

    let mut moved = 0;
    for key in scan_keys(store, &pattern)? {
        let mut pipe = Pipeline::new();
        for (member, score) in store.zrange(&key, 0, -1)? {
            pipe.zadd(keys::CONTACT_NOTIFICATIONS, score, member);
            moved += 1;
            if pipe.len() >= BATCH {
                flush(store, &mut pipe)?;
            }
        }
        pipe.del(key);
        flush(store, &mut pipe)?;
    }
    Ok(moved)
}

impl Migration for HistorySplit {
    fn version(&self) -> Version {
        Version::new(2, 12)
    }

    fn description(&self) -> &'static str {
        "per-contact notification history"
    }

    fn forward(&self, database: &Database) -> Result<(), MigrationError> {
        let moved = split_history(database)?;
        tracing::info!(events = moved, "Notification history split");
        Ok(())
    }

    fn reverse(&self, database: &Database) -> Result<(), MigrationError> {
        let moved = merge_history(database)?;
        tracing::info!(events = moved, "Notification history merged");
        Ok(())
    }
}
