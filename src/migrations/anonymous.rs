//! 2.7: give contacts without an owner a named user set

use super::{move_keys, Migration, MigrationError, Version};
use crate::database::{keys, Database};

/// Contacts of the empty user lived under a bare prefix
const LEGACY_KEY: &str = "moira-user-contacts:";
pub const ANONYMOUS_USER: &str = "anonymous";

pub struct AnonymousContacts;

impl Migration for AnonymousContacts {
    fn version(&self) -> Version {
        Version::new(2, 7)
    }

    fn description(&self) -> &'static str {
        "anonymous user contacts"
    }

    fn forward(&self, database: &Database) -> Result<(), MigrationError> {
        let moves = [(LEGACY_KEY.to_string(), keys::user_contacts(ANONYMOUS_USER))];
        let moved = move_keys(database.store().as_ref(), &moves)?;
        tracing::info!(moved, "Anonymous contacts moved");
        Ok(())
    }

    fn reverse(&self, database: &Database) -> Result<(), MigrationError> {
        let moves = [(keys::user_contacts(ANONYMOUS_USER), LEGACY_KEY.to_string())];
        move_keys(database.store().as_ref(), &moves)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::store::StoreExt;

    #[test]
    fn test_round_trip() {
        let (store, db) = database(0);
        store.sadd(LEGACY_KEY, &["c1", "c2"]).unwrap();

        AnonymousContacts.forward(&db).unwrap();
        assert_eq!(db.user_contact_ids(ANONYMOUS_USER).unwrap().len(), 2);
        assert!(!store.exists(LEGACY_KEY).unwrap());

        // already applied
        AnonymousContacts.forward(&db).unwrap();
        assert_eq!(db.user_contact_ids(ANONYMOUS_USER).unwrap().len(), 2);

        AnonymousContacts.reverse(&db).unwrap();
        let mut members = store.smembers(LEGACY_KEY).unwrap();
        members.sort();
        assert_eq!(members, vec!["c1", "c2"]);
    }
}
