use std::collections::BTreeSet;

use super::keys;
use super::{decode_reply, diff, Database, DbError};
use crate::model::{Owner, Subscription};
use crate::store::{Pipeline, StoreExt};

fn owner_subscriptions(owner: &Owner) -> String {
    match owner {
        Owner::User(user) => keys::user_subscriptions(user),
        Owner::Team(team) => keys::team_subscriptions(team),
    }
}

impl Database {
    pub fn get_subscription(&self, id: &str) -> Result<Subscription, DbError> {
        self.get_json(&keys::subscription(id))
    }

    pub fn get_subscriptions(&self, ids: &[String]) -> Result<Vec<Option<Subscription>>, DbError> {
        let mut pipe = Pipeline::new();
        for id in ids {
            pipe.get(keys::subscription(id));
        }
        self.exec(pipe)?.into_iter().map(decode_reply).collect()
    }

    /// Store a subscription, moving it between owner and tag sets as
    /// needed
    pub fn save_subscription(&self, subscription: &Subscription) -> Result<(), DbError> {
        subscription.validate()?;
        let owner = subscription.owner()?;
        let old = match self.get_subscription(&subscription.id) {
            Ok(old) => Some(old),
            Err(DbError::Nil) => None,
            Err(e) => return Err(e),
        };

        let id = subscription.id.as_str();
        let mut pipe = Pipeline::new();
        pipe.set(keys::subscription(id), Self::to_json(subscription)?);

        if let Some(old_owner) = old.as_ref().and_then(|o| o.owner().ok()) {
            if old_owner != owner {
                pipe.srem(owner_subscriptions(&old_owner), id);
            }
        }
        pipe.sadd(owner_subscriptions(&owner), id);

        let old_tags = old.as_ref().map(|o| o.tags.clone()).unwrap_or_default();
        let (removed, _) = diff(&old_tags, &subscription.tags);
        for tag in removed {
            pipe.srem(keys::tag_subscriptions(tag), id);
        }
        for tag in &subscription.tags {
            pipe.sadd(keys::tag_subscriptions(tag), id);
        }
        if !subscription.tags.is_empty() {
            pipe.sadd_many(keys::TAGS, subscription.tags.iter().cloned());
        }

        if subscription.any_tags {
            pipe.sadd(keys::ANY_TAGS_SUBSCRIPTIONS, id);
        } else {
            pipe.srem(keys::ANY_TAGS_SUBSCRIPTIONS, id);
        }
        self.exec(pipe)?;
        Ok(())
    }

    pub fn remove_subscription(&self, id: &str) -> Result<(), DbError> {
        let subscription = match self.get_subscription(id) {
            Ok(subscription) => subscription,
            Err(DbError::Nil) => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut pipe = Pipeline::new();
        pipe.del(keys::subscription(id));
        if let Ok(owner) = subscription.owner() {
            pipe.srem(owner_subscriptions(&owner), id);
        }
        for tag in &subscription.tags {
            pipe.srem(keys::tag_subscriptions(tag), id);
        }
        pipe.srem(keys::ANY_TAGS_SUBSCRIPTIONS, id);
        self.exec(pipe)?;
        Ok(())
    }

    pub fn user_subscription_ids(&self, user: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::user_subscriptions(user))?)
    }

    pub fn team_subscription_ids(&self, team: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::team_subscriptions(team))?)
    }

    pub fn tag_subscription_ids(&self, tag: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::tag_subscriptions(tag))?)
    }

    /// Subscriptions listening on any of `tags`, plus every any-tags
    /// subscription
    pub fn tags_subscriptions(&self, tags: &[String]) -> Result<Vec<Subscription>, DbError> {
        let mut pipe = Pipeline::new();
        for tag in tags {
            pipe.smembers(keys::tag_subscriptions(tag));
        }
        pipe.smembers(keys::ANY_TAGS_SUBSCRIPTIONS);

        let mut ids = BTreeSet::new();
        for reply in self.exec(pipe)? {
            ids.extend(reply.into_strings()?);
        }
        let ids: Vec<String> = ids.into_iter().collect();
        Ok(self.get_subscriptions(&ids)?.into_iter().flatten().collect())
    }

    pub fn all_subscriptions(&self) -> Result<Vec<Subscription>, DbError> {
        let ids: Vec<String> = self
            .store
            .scan_all(&keys::subscription("*"))?
            .into_iter()
            .filter_map(|key| key.strip_prefix("moira-subscription:").map(str::to_string))
            .collect();
        Ok(self.get_subscriptions(&ids)?.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::model::ValidationError;

    #[test]
    fn test_save_moves_memberships() {
        let (_store, db) = database(100);
        let sub = Subscription::for_user("s1", "alice").with_tags(["db", "prod"]);
        db.save_subscription(&sub).unwrap();
        assert_eq!(db.tag_subscription_ids("db").unwrap(), vec!["s1"]);
        assert_eq!(db.user_subscription_ids("alice").unwrap(), vec!["s1"]);

        let mut moved = sub.clone().with_tags(["prod"]);
        moved.user = String::new();
        moved.team = "ops".into();
        db.save_subscription(&moved).unwrap();

        assert!(db.tag_subscription_ids("db").unwrap().is_empty());
        assert!(db.user_subscription_ids("alice").unwrap().is_empty());
        assert_eq!(db.team_subscription_ids("ops").unwrap(), vec!["s1"]);
        assert_eq!(db.get_subscription("s1").unwrap(), moved);
    }

    #[test]
    fn test_any_tags_included() {
        let (_store, db) = database(100);
        db.save_subscription(&Subscription::for_user("s1", "alice").with_tags(["db"]))
            .unwrap();
        let mut any = Subscription::for_user("s2", "bob");
        any.any_tags = true;
        db.save_subscription(&any).unwrap();
        db.save_subscription(&Subscription::for_user("s3", "carol").with_tags(["web"]))
            .unwrap();

        let found: Vec<String> = db
            .tags_subscriptions(&["db".into()])
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(found, vec!["s1", "s2"]);
    }

    #[test]
    fn test_validation() {
        let (_store, db) = database(100);
        let untagged = Subscription::for_user("s1", "alice");
        assert!(matches!(
            db.save_subscription(&untagged),
            Err(DbError::Validation(ValidationError::NoTags))
        ));
        let mut ownerless = Subscription::for_user("s1", "").with_tags(["db"]);
        ownerless.team = String::new();
        assert!(matches!(
            db.save_subscription(&ownerless),
            Err(DbError::Validation(ValidationError::Owner(_)))
        ));
    }

    #[test]
    fn test_remove() {
        let (_store, db) = database(100);
        db.save_subscription(&Subscription::for_user("s1", "alice").with_tags(["db"]))
            .unwrap();
        db.remove_subscription("s1").unwrap();
        assert!(db.tag_subscription_ids("db").unwrap().is_empty());
        assert!(db.all_subscriptions().unwrap().is_empty());
        db.remove_subscription("s1").unwrap();
    }
}
