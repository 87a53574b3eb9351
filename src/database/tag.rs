use super::keys;
use super::{Database, DbError};
use crate::store::{Pipeline, StoreExt};

fn in_use(tag: &str) -> DbError {
    DbError::Invariant(format!("tag {} still has triggers or subscriptions", tag))
}

impl Database {
    pub fn tag_names(&self) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(keys::TAGS)?)
    }

    fn tag_in_use(&self, tag: &str) -> Result<bool, DbError> {
        Ok(self.store.scard(&keys::tag_triggers(tag))? > 0
            || self.store.scard(&keys::tag_subscriptions(tag))? > 0)
    }

    /// Remove a tag nothing refers to any more. Empty index sets do not
    /// exist, so only the tag list entry is written.
    pub fn remove_tag(&self, tag: &str) -> Result<(), DbError> {
        if self.store.cluster_walker().is_some() {
            return self.remove_tag_verified(tag);
        }
        let triggers = keys::tag_triggers(tag);
        let subscriptions = keys::tag_subscriptions(tag);
        self.transaction(&[keys::TAGS, triggers.as_str(), subscriptions.as_str()], || {
            if self.tag_in_use(tag)? {
                return Err(in_use(tag));
            }
            let mut pipe = Pipeline::new();
            pipe.srem(keys::TAGS, tag);
            Ok((pipe, ()))
        })
    }

    /// The tag sets live on different slots in cluster mode and cannot be
    /// watched together. The tag is restored if a save raced the removal.
    fn remove_tag_verified(&self, tag: &str) -> Result<(), DbError> {
        if self.tag_in_use(tag)? {
            return Err(in_use(tag));
        }
        self.store.srem(keys::TAGS, &[tag])?;
        if self.tag_in_use(tag)? {
            self.store.sadd(keys::TAGS, &[tag])?;
            return Err(in_use(tag));
        }
        Ok(())
    }

    /// Remove every unused tag, returning the removed names
    pub fn sweep_tags(&self) -> Result<Vec<String>, DbError> {
        let mut removed = Vec::new();
        for tag in self.tag_names()? {
            if self.tag_in_use(&tag)? {
                continue;
            }
            match self.remove_tag(&tag) {
                Ok(()) => removed.push(tag),
                Err(DbError::Invariant(_)) => {
                    tracing::debug!(tag = %tag, "Tag came into use during sweep");
                }
                Err(e) => return Err(e),
            }
        }
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Unused tags removed");
        }
        Ok(removed)
    }
}
