use std::collections::HashMap;

use super::keys;
use super::{decode_reply, Database, DbError};
use crate::model::CheckData;
use crate::store::{Pipeline, StoreExt};

impl Database {
    pub fn get_last_check(&self, trigger_id: &str) -> Result<CheckData, DbError> {
        self.get_json(&keys::last_check(trigger_id))
    }

    /// Check data for several triggers, `None` for never-checked ones
    pub fn get_last_checks(&self, trigger_ids: &[String]) -> Result<Vec<Option<CheckData>>, DbError> {
        let mut pipe = Pipeline::new();
        for id in trigger_ids {
            pipe.get(keys::last_check(id));
        }
        self.exec(pipe)?.into_iter().map(decode_reply).collect()
    }

    /// Store check data, keeping the score ranking, the bad-state set and
    /// the checks counter in the same transaction
    pub fn set_last_check(&self, trigger_id: &str, check: &CheckData) -> Result<(), DbError> {
        let mut pipe = Pipeline::new();
        pipe.set(keys::last_check(trigger_id), Self::to_json(check)?);
        pipe.zadd(keys::TRIGGERS_CHECKS, check.score as f64, trigger_id);
        if check.score > 0 {
            pipe.sadd(keys::BAD_STATE_TRIGGERS, trigger_id);
        } else {
            pipe.srem(keys::BAD_STATE_TRIGGERS, trigger_id);
        }
        pipe.incr(keys::CHECKS_COUNTER);
        self.exec(pipe)?;
        Ok(())
    }

    pub fn remove_last_check(&self, trigger_id: &str) -> Result<(), DbError> {
        let mut pipe = Pipeline::new();
        pipe.del(keys::last_check(trigger_id));
        pipe.zrem(keys::TRIGGERS_CHECKS, trigger_id);
        pipe.srem(keys::BAD_STATE_TRIGGERS, trigger_id);
        pipe.zadd(keys::TRIGGERS_TO_REINDEX, self.now() as f64, trigger_id);
        self.exec(pipe)?;
        Ok(())
    }

    /// Triggers whose last check scored above zero
    pub fn bad_state_trigger_ids(&self) -> Result<Vec<String>, DbError> {
        Ok(self.store.smembers(keys::BAD_STATE_TRIGGERS)?)
    }

    /// Total number of checks performed
    pub fn checks_count(&self) -> Result<i64, DbError> {
        match self.store.get(keys::CHECKS_COUNTER)? {
            Some(raw) => raw
                .parse()
                .map_err(|_| DbError::Invariant(format!("checks counter is not a number: {}", raw))),
            None => Ok(0),
        }
    }

    /// Put metrics into maintenance until the given Unix seconds
    pub fn set_metrics_maintenance(
        &self,
        trigger_id: &str,
        metrics: &HashMap<String, i64>,
    ) -> Result<(), DbError> {
        self.set_maintenance(trigger_id, metrics, None)
    }

    /// Put the whole trigger, and optionally some metrics, into maintenance
    pub fn set_trigger_maintenance(
        &self,
        trigger_id: &str,
        metrics: &HashMap<String, i64>,
        until: i64,
    ) -> Result<(), DbError> {
        self.set_maintenance(trigger_id, metrics, Some(until))
    }

    /// Read-modify-write of the check data with GETSET as compare-and-swap.
    /// When another writer got in between, the change is reapplied on top
    /// of the value it wrote.
    fn set_maintenance(
        &self,
        trigger_id: &str,
        metrics: &HashMap<String, i64>,
        trigger: Option<i64>,
    ) -> Result<(), DbError> {
        let key = keys::last_check(trigger_id);
        let Some(mut base) = self.store.get(&key)? else {
            return Ok(());
        };
        // Value the store holds if nobody else wrote since our last GETSET
        let mut stored = base.clone();

        for _ in 0..self.options.transaction_retries {
            let mut check: CheckData = serde_json::from_str(&base)?;
            for (metric, until) in metrics {
                if let Some(state) = check.metrics.get_mut(metric) {
                    state.maintenance = *until;
                }
            }
            if let Some(until) = trigger {
                check.maintenance = until;
            }

            let written = Self::to_json(&check)?;
            match self.store.getset(&key, &written)? {
                Some(previous) if previous != stored => {
                    base = previous;
                    stored = written;
                }
                _ => return Ok(()),
            }
        }
        Err(DbError::TransactionRetryLimit)
    }
}
