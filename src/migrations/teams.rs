//! 2.13: case-insensitive team name index
//!
//! Teams created before the index existed may share a name up to case.
//! Walking teams by id, a colliding name gets the first free `_<i>`
//! suffix, so every lowercased name maps to exactly one team.

use std::collections::HashSet;

use super::{Migration, MigrationError, Version};
use crate::database::{keys, Database};
use crate::model::Team;
use crate::store::{Pipeline, StoreExt};

pub struct TeamNames;

/// Fill the name index, renaming colliding teams. Returns renamed teams.
pub fn fill_team_names(database: &Database) -> Result<usize, MigrationError> {
    let store = database.store();
    let mut teams: Vec<(String, Team)> = Vec::new();
    for (id, raw) in store.hgetall(keys::TEAMS)? {
        match serde_json::from_str::<Team>(&raw) {
            Ok(team) => teams.push((id, team)),
            Err(e) => tracing::warn!(team_id = %id, error = %e, "Skipping malformed team"),
        }
    }
    teams.sort_by(|a, b| a.0.cmp(&b.0));

    let mut taken: HashSet<String> = HashSet::new();
    let mut renamed = 0;
    let mut pipe = Pipeline::new();
    for (id, mut team) in teams {
        let base = team.name.clone();
        let mut candidate = base.clone();
        let mut i = 0;
        while taken.contains(&candidate.to_lowercase()) {
            i += 1;
            candidate = format!("{}_{}", base, i);
        }
        if candidate != team.name {
            tracing::info!(team_id = %id, from = %team.name, to = %candidate, "Renaming team");
            team.name = candidate;
            pipe.hset(keys::TEAMS, id.as_str(), serde_json::to_string(&team)?);
            renamed += 1;
        }
        let folded = team.folded_name();
        pipe.hset(keys::TEAMS_BY_NAMES, folded.as_str(), id.as_str());
        taken.insert(folded);
    }

    for reply in store.exec(pipe)? {
        reply.check()?;
    }
    Ok(renamed)
}

impl Migration for TeamNames {
    fn version(&self) -> Version {
        Version::new(2, 13)
    }

    fn description(&self) -> &'static str {
        "team names index"
    }

    fn forward(&self, database: &Database) -> Result<(), MigrationError> {
        let renamed = fill_team_names(database)?;
        tracing::info!(renamed, "Team names index filled");
        Ok(())
    }

    /// Renamed teams keep their new names
    fn reverse(&self, database: &Database) -> Result<(), MigrationError> {
        database.store().del(&[keys::TEAMS_BY_NAMES])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;

    fn seed(db: &Database, id: &str, name: &str) {
        let team = Team::new(id, name);
        db.store()
            .hset(keys::TEAMS, id, &serde_json::to_string(&team).unwrap())
            .unwrap();
    }

    #[test]
    fn test_collisions_get_suffixes() {
        let (_store, db) = database(0);
        seed(&db, "t1", "Ops");
        seed(&db, "t2", "ops");
        seed(&db, "t3", "OPS");
        seed(&db, "t4", "ops_1");
        seed(&db, "t5", "Dev");

        assert_eq!(fill_team_names(&db).unwrap(), 3);
        let names: Vec<String> = db.teams().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Ops", "ops_1", "OPS_2", "ops_1_1", "Dev"]);

        let index = db.store().hgetall(keys::TEAMS_BY_NAMES).unwrap();
        assert_eq!(index.len(), 5);
        for team in db.teams().unwrap() {
            assert_eq!(index.get(&team.folded_name()), Some(&team.id));
            assert_eq!(db.team_by_name(&team.name).unwrap().id, team.id);
        }
    }

    #[test]
    fn test_reverse_drops_index() {
        let (_store, db) = database(0);
        seed(&db, "t1", "Ops");
        TeamNames.forward(&db).unwrap();
        assert!(db.team_by_name("ops").is_ok());

        TeamNames.reverse(&db).unwrap();
        assert!(db.team_by_name("ops").unwrap_err().is_nil());
        assert_eq!(db.get_team("t1").unwrap().name, "Ops");
    }
}
