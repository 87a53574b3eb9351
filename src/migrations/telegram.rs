//! 2.11: telegram chat ids become JSON records
//!
//! A bare integer value turns into `{"chat_id":N}`. Negative ids are
//! group chats and are tagged as such. Values keep their TTL.

use serde::{Deserialize, Serialize};

use super::{scan_keys, Migration, MigrationError, Version};
use crate::database::{keys, Database};
use crate::store::{Pipeline, SetOptions, StoreExt};

const GROUP: &str = "group";

/// Stored telegram chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramChat {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub chat_type: String,
    pub chat_id: i64,
}

impl TelegramChat {
    pub fn from_id(chat_id: i64) -> Self {
        let chat_type = if chat_id < 0 { GROUP.to_string() } else { String::new() };
        Self { chat_type, chat_id }
    }
}

pub struct TelegramUsers;

impl TelegramUsers {
    /// Rewrite every user value `convert` returns a replacement for
    fn rewrite<F>(database: &Database, convert: F) -> Result<usize, MigrationError>
    where
        F: Fn(&str, &str) -> Option<String>,
    {
        let store = database.store();
        let pattern = format!("{}*", keys::TELEGRAM_USERS_PREFIX);
        let mut pipe = Pipeline::new();
        for key in scan_keys(store.as_ref(), &pattern)? {
            if key.starts_with(keys::TELEGRAM_LOCK_PREFIX) {
                continue;
            }
            let Some(value) = store.get(&key)? else {
                continue;
            };
            if let Some(converted) = convert(&key, &value) {
                pipe.set_with(key, converted, SetOptions::new().keep_ttl());
            }
        }

        let changed = pipe.len();
        for reply in store.exec(pipe)? {
            reply.check()?;
        }
        Ok(changed)
    }
}

impl Migration for TelegramUsers {
    fn version(&self) -> Version {
        Version::new(2, 11)
    }

    fn description(&self) -> &'static str {
        "telegram users"
    }

    fn forward(&self, database: &Database) -> Result<(), MigrationError> {
        let changed = Self::rewrite(database, |_, value| {
            let chat_id = value.trim().parse::<i64>().ok()?;
            serde_json::to_string(&TelegramChat::from_id(chat_id)).ok()
        })?;
        tracing::info!(users = changed, "Telegram users converted");
        Ok(())
    }

    fn reverse(&self, database: &Database) -> Result<(), MigrationError> {
        let changed = Self::rewrite(database, |key, value| {
            if value.trim().parse::<i64>().is_ok() {
                return None;
            }
            match serde_json::from_str::<TelegramChat>(value) {
                Ok(chat) => Some(chat.chat_id.to_string()),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed telegram user");
                    None
                }
            }
        })?;
        tracing::info!(users = changed, "Telegram users restored");
        Ok(())
    }
}
