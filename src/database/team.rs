//! Teams, their members, and the case-insensitive name index

use super::keys;
use super::{Database, DbError};
use crate::model::{Team, ValidationError};
use crate::store::{Pipeline, StoreExt};

impl Database {
    /// Create or update a team. A missing id is generated. Names are
    /// unique case-insensitively.
    pub fn save_team(&self, mut team: Team) -> Result<Team, DbError> {
        if team.name.trim().is_empty() {
            return Err(ValidationError::EmptyTeamName.into());
        }
        if team.id.is_empty() {
            team.id = uuid::Uuid::new_v4().to_string();
        }
        let folded = team.folded_name();
        let old_name = match self.get_team(&team.id) {
            Ok(old) if old.folded_name() != folded => Some(old.folded_name()),
            Ok(_) | Err(DbError::Nil) => None,
            Err(e) => return Err(e),
        };

        // The name is claimed first, so two saves cannot both own it
        self.transaction(&[keys::TEAMS_BY_NAMES], || {
            if let Some(owner) = self.store.hget(keys::TEAMS_BY_NAMES, &folded)? {
                if owner != team.id {
                    return Err(DbError::Invariant(format!(
                        "team name {} is already taken",
                        team.name
                    )));
                }
            }
            let mut pipe = Pipeline::new();
            if let Some(old) = &old_name {
                pipe.hdel(keys::TEAMS_BY_NAMES, old.as_str());
            }
            pipe.hset(keys::TEAMS_BY_NAMES, folded.as_str(), team.id.as_str());
            Ok((pipe, ()))
        })?;

        let mut pipe = Pipeline::new();
        pipe.hset(keys::TEAMS, team.id.as_str(), Self::to_json(&team)?);
        self.exec(pipe)?;
        Ok(team)
    }

    pub fn get_team(&self, id: &str) -> Result<Team, DbError> {
        match self.store.hget(keys::TEAMS, id)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(DbError::Nil),
        }
    }

    /// All teams ordered by id
    pub fn teams(&self) -> Result<Vec<Team>, DbError> {
        let mut teams = self
            .store
            .hgetall(keys::TEAMS)?
            .into_values()
            .map(|raw| serde_json::from_str(&raw))
            .collect::<Result<Vec<Team>, _>>()?;
        teams.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(teams)
    }

    pub fn team_by_name(&self, name: &str) -> Result<Team, DbError> {
        let id = self
            .store
            .hget(keys::TEAMS_BY_NAMES, &name.to_lowercase())?
            .ok_or(DbError::Nil)?;
        self.get_team(&id)
    }

    pub fn add_team_user(&self, team_id: &str, user: &str) -> Result<(), DbError> {
        self.get_team(team_id)?;
        let mut pipe = Pipeline::new();
        pipe.sadd(keys::team_users(team_id), user);
        pipe.sadd(keys::user_teams(user), team_id);
        self.exec(pipe)?;
        Ok(())
    }

    pub fn remove_team_user(&self, team_id: &str, user: &str) -> Result<(), DbError> {
        let mut pipe = Pipeline::new();
        pipe.srem(keys::team_users(team_id), user);
        pipe.srem(keys::user_teams(user), team_id);
        self.exec(pipe)?;
        Ok(())
    }

    pub fn team_users(&self, team_id: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::team_users(team_id))?)
    }

    pub fn user_teams(&self, user: &str) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(&keys::user_teams(user))?)
    }

    /// Delete a team with its name index entry and memberships
    pub fn remove_team(&self, team_id: &str) -> Result<(), DbError> {
        let team = self.get_team(team_id)?;
        let users = self.team_users(team_id)?;

        let mut pipe = Pipeline::new();
        for user in &users {
            pipe.srem(keys::user_teams(user), team_id);
        }
        pipe.del(keys::team_users(team_id));
        pipe.hdel(keys::TEAMS, team_id);
        pipe.hdel(keys::TEAMS_BY_NAMES, team.folded_name());
        self.exec(pipe)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;

    #[test]
    fn test_casefold_unique_names() {
        let (_store, db) = database(100);
        db.save_team(Team::new("t1", "Ops")).unwrap();
        assert!(matches!(
            db.save_team(Team::new("t2", "OPS")),
            Err(DbError::Invariant(_))
        ));
        assert_eq!(db.team_by_name("oPs").unwrap().id, "t1");
    }

    #[test]
    fn test_rename_frees_old_name() {
        let (_store, db) = database(100);
        db.save_team(Team::new("t1", "Ops")).unwrap();
        db.save_team(Team::new("t1", "Platform")).unwrap();
        assert!(db.team_by_name("ops").unwrap_err().is_nil());
        db.save_team(Team::new("t2", "ops")).unwrap();
        assert_eq!(db.teams().unwrap().len(), 2);
    }

    #[test]
    fn test_generated_id_and_members() {
        let (_store, db) = database(100);
        let team = db.save_team(Team::new("", "Ops")).unwrap();
        assert!(!team.id.is_empty());

        db.add_team_user(&team.id, "alice").unwrap();
        assert_eq!(db.user_teams("alice").unwrap(), vec![team.id.clone()]);

        db.remove_team(&team.id).unwrap();
        assert!(db.user_teams("alice").unwrap().is_empty());
        assert!(db.team_by_name("ops").unwrap_err().is_nil());
    }

    #[test]
    fn test_concurrent_claim_of_same_name() {
        let (store, db) = database(100);
        let mut rival = Pipeline::new();
        rival.hset(keys::TEAMS_BY_NAMES, "ops", "t2");
        rival.hset(keys::TEAMS, "t2", serde_json::to_string(&Team::new("t2", "OPS")).unwrap());
        store.interfere(rival);

        assert!(matches!(
            db.save_team(Team::new("t1", "Ops")),
            Err(DbError::Invariant(_))
        ));
        assert_eq!(db.team_by_name("ops").unwrap().id, "t2");
        assert!(db.get_team("t1").unwrap_err().is_nil());
    }

    #[test]
    fn test_unrelated_write_is_retried() {
        let (store, db) = database(100);
        let mut other = Pipeline::new();
        other.hset(keys::TEAMS_BY_NAMES, "dev", "t3");
        store.interfere(other);

        db.save_team(Team::new("t1", "Ops")).unwrap();
        assert_eq!(db.team_by_name("ops").unwrap().id, "t1");
        assert_eq!(store.commands().iter().filter(|c| **c == "WATCH").count(), 2);
    }

    #[test]
    fn test_member_of_missing_team() {
        let (_store, db) = database(100);
        assert!(db.add_team_user("nope", "alice").unwrap_err().is_nil());
    }
}
