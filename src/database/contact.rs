use super::keys;
use super::{decode_reply, Database, DbError};
use crate::model::{Contact, Owner};
use crate::store::{Pipeline, StoreExt};

fn owner_contacts(owner: &Owner) -> String {
    match owner {
        Owner::User(user) => keys::user_contacts(user),
        Owner::Team(team) => keys::team_contacts(team),
    }
}

impl Database {
    pub fn get_contact(&self, id: &str) -> Result<Contact, DbError> {
        self.get_json(&keys::contact(id))
    }

    pub fn get_contacts(&self, ids: &[String]) -> Result<Vec<Option<Contact>>, DbError> {
        let mut pipe = Pipeline::new();
        for id in ids {
            pipe.get(keys::contact(id));
        }
        self.exec(pipe)?.into_iter().map(decode_reply).collect()
    }

    /// Store a contact. A changed owner moves the id from the old owner's
    /// set to the new one in the same transaction.
    pub fn save_contact(&self, contact: &Contact) -> Result<(), DbError> {
        let owner = contact.owner()?;
        if contact.id.is_empty() {
            return Err(crate::model::ValidationError::EmptyContactId.into());
        }
        let old_owner = match self.get_contact(&contact.id) {
            Ok(old) => old.owner().ok(),
            Err(DbError::Nil) => None,
            Err(e) => return Err(e),
        };

        let mut pipe = Pipeline::new();
        pipe.set(keys::contact(&contact.id), Self::to_json(contact)?);
        if let Some(old_owner) = old_owner.filter(|o| *o != owner) {
            pipe.srem(owner_contacts(&old_owner), contact.id.as_str());
        }
        pipe.sadd(owner_contacts(&owner), contact.id.as_str());
        self.exec(pipe)?;
        Ok(())
    }

    pub fn remove_contact(&self, id: &str) -> Result<(), DbError> {
        let contact = match self.get_contact(id) {
            Ok(contact) => contact,
            Err(DbError::Nil) => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut pipe = Pipeline::new();
        pipe.del(keys::contact(id));
        if let Ok(owner) = contact.owner() {
            pipe.srem(owner_contacts(&owner), id);
        }
        self.exec(pipe)?;
        Ok(())
    }

    pub fn user_contact_ids(&self, user: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::user_contacts(user))?)
    }

    pub fn team_contact_ids(&self, team: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::team_contacts(team))?)
    }

    pub fn all_contacts(&self) -> Result<Vec<Contact>, DbError> {
        let ids: Vec<String> = self
            .store
            .scan_all(&keys::contact("*"))?
            .into_iter()
            .filter_map(|key| key.strip_prefix("moira-contact:").map(str::to_string))
            .collect();
        Ok(self.get_contacts(&ids)?.into_iter().flatten().collect())
    }
}
