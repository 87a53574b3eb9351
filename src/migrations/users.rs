//! Bulk maintenance of user-owned contacts and subscriptions

use std::collections::BTreeSet;
use std::sync::Arc;

use super::MigrationError;
use crate::database::{Database, DbError};

pub struct UserMaintenance {
    database: Arc<Database>,
}

impl UserMaintenance {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Every user owning a contact or a subscription
    pub fn users(&self) -> Result<BTreeSet<String>, MigrationError> {
        let mut users = BTreeSet::new();
        for contact in self.database.all_contacts()? {
            if !contact.user.is_empty() {
                users.insert(contact.user);
            }
        }
        for subscription in self.database.all_subscriptions()? {
            if !subscription.user.is_empty() {
                users.insert(subscription.user);
            }
        }
        Ok(users)
    }

    /// Handle users missing from `whitelist`: delete their data when
    /// `delete` is set, otherwise disable their subscriptions. Returns the
    /// affected users.
    pub fn cleanup(&self, whitelist: &[String], delete: bool) -> Result<Vec<String>, MigrationError> {
        let stale: Vec<String> = self
            .users()?
            .into_iter()
            .filter(|user| !whitelist.contains(user))
            .collect();
        if delete {
            self.delete_users(&stale)?;
        } else {
            self.disable_users(&stale)?;
        }
        tracing::info!(users = stale.len(), delete, "Users cleaned up");
        Ok(stale)
    }

    /// Remove the subscriptions and contacts of `users`. Returns removed
    /// records.
    pub fn delete_users(&self, users: &[String]) -> Result<usize, MigrationError> {
        let mut removed = 0;
        for user in users {
            for id in self.database.user_subscription_ids(user)? {
                self.database.remove_subscription(&id)?;
                removed += 1;
            }
            for id in self.database.user_contact_ids(user)? {
                self.database.remove_contact(&id)?;
                removed += 1;
            }
            tracing::info!(user = %user, "User data removed");
        }
        Ok(removed)
    }

    /// Turn off every subscription of `users`. Returns disabled
    /// subscriptions.
    pub fn disable_users(&self, users: &[String]) -> Result<usize, MigrationError> {
        let mut disabled = 0;
        for user in users {
            let ids = self.database.user_subscription_ids(user)?;
            for mut subscription in self.database.get_subscriptions(&ids)?.into_iter().flatten() {
                if subscription.enabled {
                    subscription.enabled = false;
                    self.database.save_subscription(&subscription)?;
                    disabled += 1;
                }
            }
        }
        Ok(disabled)
    }

    /// Hand every contact and subscription of `from` over to `to`.
    /// Returns moved records.
    pub fn transfer(&self, from: &str, to: &str) -> Result<usize, MigrationError> {
        if from.is_empty() || to.is_empty() {
            return Err(DbError::Invariant("transfer needs both users".into()).into());
        }
        let mut moved = 0;
        let contact_ids = self.database.user_contact_ids(from)?;
        for mut contact in self.database.get_contacts(&contact_ids)?.into_iter().flatten() {
            contact.user = to.to_string();
            self.database.save_contact(&contact)?;
            moved += 1;
        }
        let subscription_ids = self.database.user_subscription_ids(from)?;
        for mut subscription in self.database.get_subscriptions(&subscription_ids)?.into_iter().flatten() {
            subscription.user = to.to_string();
            self.database.save_subscription(&subscription)?;
            moved += 1;
        }
        tracing::info!(from = %from, to = %to, moved, "User data transferred");
        Ok(moved)
    }

    /// Turn plotting on for every subscription. Returns changed
    /// subscriptions.
    pub fn enable_plotting(&self) -> Result<usize, MigrationError> {
        let mut changed = 0;
        for mut subscription in self.database.all_subscriptions()? {
            if subscription.plotting.enabled {
                continue;
            }
            subscription.plotting.enabled = true;
            self.database.save_subscription(&subscription)?;
            changed += 1;
        }
        tracing::info!(subscriptions = changed, "Plotting enabled");
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::model::{Contact, Subscription};

    fn setup() -> (Arc<Database>, UserMaintenance) {
        let (_store, db) = database(0);
        let db = Arc::new(db);
        for user in ["alice", "bob"] {
            db.save_contact(&Contact::for_user(format!("{}-c", user), "log", user, user))
                .unwrap();
            db.save_subscription(
                &Subscription::for_user(format!("{}-s", user), user)
                    .with_tags(["prod"])
                    .with_contacts([format!("{}-c", user)]),
            )
            .unwrap();
        }
        let maintenance = UserMaintenance::new(db.clone());
        (db, maintenance)
    }

    #[test]
    fn test_cleanup_disables_by_default() {
        let (db, maintenance) = setup();
        let affected = maintenance.cleanup(&["alice".to_string()], false).unwrap();
        assert_eq!(affected, vec!["bob"]);
        assert!(!db.get_subscription("bob-s").unwrap().enabled);
        assert!(db.get_subscription("alice-s").unwrap().enabled);
        assert!(db.get_contact("bob-c").is_ok());
    }

    #[test]
    fn test_cleanup_deletes() {
        let (db, maintenance) = setup();
        maintenance.cleanup(&["alice".to_string()], true).unwrap();
        assert!(db.get_subscription("bob-s").unwrap_err().is_nil());
        assert!(db.get_contact("bob-c").unwrap_err().is_nil());
        assert!(db.user_contact_ids("bob").unwrap().is_empty());
        assert_eq!(maintenance.users().unwrap().into_iter().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[test]
    fn test_transfer_moves_ownership() {
        let (db, maintenance) = setup();
        assert_eq!(maintenance.transfer("bob", "carol").unwrap(), 2);
        assert!(db.user_contact_ids("bob").unwrap().is_empty());
        assert_eq!(db.user_contact_ids("carol").unwrap(), vec!["bob-c"]);
        assert_eq!(db.user_subscription_ids("carol").unwrap(), vec!["bob-s"]);
        assert_eq!(db.get_subscription("bob-s").unwrap().user, "carol");
    }

    #[test]
    fn test_enable_plotting() {
        let (db, maintenance) = setup();
        assert_eq!(maintenance.enable_plotting().unwrap(), 2);
        assert!(db.get_subscription("alice-s").unwrap().plotting.enabled);
        assert_eq!(maintenance.enable_plotting().unwrap(), 0);
    }
}
