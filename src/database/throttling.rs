//! Per-trigger throttling window

use super::keys;
use super::{Database, DbError};
use crate::store::{Pipeline, ScoreRange, StoreExt};

/// `(next, beginning)` of a trigger's throttling window, Unix seconds.
/// Zero means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Throttling {
    pub next: i64,
    pub beginning: i64,
}

fn parse_secs(raw: Option<String>) -> i64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

impl Database {
    pub fn get_throttling(&self, trigger_id: &str) -> Result<Throttling, DbError> {
        let mut pipe = Pipeline::new();
        pipe.get(keys::notifier_next(trigger_id));
        pipe.get(keys::throttling_beginning(trigger_id));
        let mut replies = self.exec(pipe)?.into_iter();

        let next = match replies.next() {
            Some(reply) => parse_secs(reply.into_option_string()?),
            None => 0,
        };
        let beginning = match replies.next() {
            Some(reply) => parse_secs(reply.into_option_string()?),
            None => 0,
        };
        Ok(Throttling { next, beginning })
    }

    /// Defer further sends of a trigger until `next`
    pub fn set_throttling_next(&self, trigger_id: &str, next: i64) -> Result<(), DbError> {
        self.store
            .set(&keys::notifier_next(trigger_id), &next.to_string())?;
        Ok(())
    }

    /// Reset throttling: forget `next` and start a new streak now. The
    /// beginning never moves backwards.
    pub fn delete_throttling(&self, trigger_id: &str) -> Result<(), DbError> {
        let current = self.get_throttling(trigger_id)?;
        let beginning = self.now().max(current.beginning);

        let mut pipe = Pipeline::new();
        pipe.del(keys::notifier_next(trigger_id));
        pipe.set(keys::throttling_beginning(trigger_id), beginning.to_string());
        self.exec(pipe)?;
        Ok(())
    }

    /// Events pushed for a trigger with timestamps at or after `from`
    pub fn event_count_since(&self, trigger_id: &str, from: i64) -> Result<i64, DbError> {
        Ok(self
            .store
            .zcount(&keys::trigger_events(trigger_id), ScoreRange::from(from as f64))?)
    }
}
