use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use super::zset::SortedSet;

/// A value held under a key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StoredValue {
    String(String),
    Set(HashSet<String>),
    SortedSet(SortedSet),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

impl StoredValue {
    /// Collections are removed once they become empty
    pub fn is_empty_collection(&self) -> bool {
        match self {
            StoredValue::String(_) => false,
            StoredValue::Set(s) => s.is_empty(),
            StoredValue::SortedSet(z) => z.is_empty(),
            StoredValue::Hash(h) => h.is_empty(),
            StoredValue::List(l) => l.is_empty(),
        }
    }
}

/// Keyspace entry with optional absolute expiry (Unix millis)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub value: StoredValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Entry {
    pub fn new(value: StoredValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at.map(|at| at <= now_millis).unwrap_or(false)
    }
}
