//! 2.2: store the trigger type explicitly
//!
//! Older triggers carry no type; it is derived from the thresholds and
//! the expression. Records are rewritten as raw JSON so triggers the
//! current model cannot read are still migrated.

use serde_json::Value;

use super::{scan_keys, Migration, MigrationError, Version};
use crate::database::{keys, Database};
use crate::model::TriggerType;
use crate::store::{Pipeline, StoreExt};

const TYPE_FIELD: &str = "trigger_type";

pub struct TriggerTypes;

impl TriggerTypes {
    fn rewrite<F>(database: &Database, change: F) -> Result<usize, MigrationError>
    where
        F: Fn(&mut serde_json::Map<String, Value>) -> bool,
    {
        let store = database.store();
        let mut pipe = Pipeline::new();
        for key in scan_keys(store.as_ref(), &keys::trigger("*"))? {
            let Some(raw) = store.get(&key)? else {
                continue;
            };
            let mut value: Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed trigger");
                    continue;
                }
            };
            let Some(object) = value.as_object_mut() else {
                tracing::warn!(key = %key, "Skipping trigger that is not an object");
                continue;
            };
            if change(object) {
                pipe.set(key, serde_json::to_string(&value)?);
            }
        }

        let changed = pipe.len();
        for reply in store.exec(pipe)? {
            reply.check()?;
        }
        Ok(changed)
    }
}

fn inferred_type(trigger: &serde_json::Map<String, Value>) -> TriggerType {
    let warn = trigger.get("warn_value").and_then(Value::as_f64);
    let error = trigger.get("error_value").and_then(Value::as_f64);
    let expression = trigger.get("expression").and_then(Value::as_str);
    TriggerType::infer(warn, error, expression)
}

impl Migration for TriggerTypes {
    fn version(&self) -> Version {
        Version::new(2, 2)
    }

    fn description(&self) -> &'static str {
        "trigger types"
    }

    fn forward(&self, database: &Database) -> Result<(), MigrationError> {
        let changed = Self::rewrite(database, |trigger| {
            let typed = trigger
                .get(TYPE_FIELD)
                .and_then(Value::as_str)
                .map(|t| !t.is_empty())
                .unwrap_or(false);
            if typed {
                return false;
            }
            let inferred = inferred_type(trigger);
            trigger.insert(TYPE_FIELD.to_string(), Value::from(inferred.as_str()));
            true
        })?;
        tracing::info!(triggers = changed, "Trigger types filled in");
        Ok(())
    }

    fn reverse(&self, database: &Database) -> Result<(), MigrationError> {
        let changed = Self::rewrite(database, |trigger| {
            if trigger.get(TYPE_FIELD).and_then(Value::as_str) == Some("") {
                return false;
            }
            trigger.insert(TYPE_FIELD.to_string(), Value::from(""));
            true
        })?;
        tracing::info!(triggers = changed, "Trigger types cleared");
        Ok(())
    }
}
