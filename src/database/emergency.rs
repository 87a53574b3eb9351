use super::keys;
use super::{diff, Database, DbError};
use crate::model::{EmergencyContact, HeartbeatType};
use crate::store::{Pipeline, StoreExt};

fn type_names(types: &[HeartbeatType]) -> Vec<String> {
    types.iter().map(|t| t.as_str().to_string()).collect()
}

impl Database {
    pub fn get_emergency_contact(&self, contact_id: &str) -> Result<EmergencyContact, DbError> {
        self.get_json(&keys::emergency_contact(contact_id))
    }

    pub fn save_emergency_contact(&self, contact: &EmergencyContact) -> Result<(), DbError> {
        contact.validate()?;
        let old_types = match self.get_emergency_contact(&contact.contact_id) {
            Ok(old) => type_names(&old.heartbeat_types),
            Err(DbError::Nil) => Vec::new(),
            Err(e) => return Err(e),
        };
        let new_types = type_names(&contact.heartbeat_types);

        let id = contact.contact_id.as_str();
        let mut pipe = Pipeline::new();
        pipe.set(keys::emergency_contact(id), Self::to_json(contact)?);
        let (removed, _) = diff(&old_types, &new_types);
        for heartbeat in removed {
            pipe.srem(keys::heartbeat_type_contacts(heartbeat), id);
        }
        for heartbeat in &new_types {
            pipe.sadd(keys::heartbeat_type_contacts(heartbeat), id);
        }
        self.exec(pipe)?;
        Ok(())
    }

    pub fn remove_emergency_contact(&self, contact_id: &str) -> Result<(), DbError> {
        let contact = self.get_emergency_contact(contact_id)?;
        let mut pipe = Pipeline::new();
        pipe.del(keys::emergency_contact(contact_id));
        for heartbeat in &contact.heartbeat_types {
            pipe.srem(keys::heartbeat_type_contacts(heartbeat.as_str()), contact_id);
        }
        self.exec(pipe)?;
        Ok(())
    }

    /// Contacts to alert when a health check of this type fails
    pub fn heartbeat_type_contact_ids(&self, heartbeat: HeartbeatType) -> Result<Vec<String>, DbError> {
        Ok(self
            .store
            .smembers(&keys::heartbeat_type_contacts(heartbeat.as_str()))?)
    }
}
