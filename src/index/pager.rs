//! Saved search results

use std::sync::Arc;
use std::time::Duration;

use super::IndexError;
use crate::database::keys;
use crate::store::{Pipeline, Store, StoreError, StoreExt};

/// Saved results expire after this long
pub const SEARCH_RESULTS_TTL: Duration = Duration::from_secs(30 * 60);

/// Result lists stored as sorted sets ranked by position
pub struct Pager {
    store: Arc<dyn Store>,
}

impl Pager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Store `ids` in order under a new pager id
    pub fn save(&self, ids: &[String]) -> Result<String, StoreError> {
        let pager_id = uuid::Uuid::new_v4().to_string();
        let key = keys::search_results(&pager_id);

        let mut pipe = Pipeline::new();
        for (rank, id) in ids.iter().enumerate() {
            pipe.zadd(key.as_str(), rank as f64, id.as_str());
        }
        pipe.expire(key, SEARCH_RESULTS_TTL);
        for reply in self.store.exec(pipe)? {
            reply.check()?;
        }
        Ok(pager_id)
    }

    /// Page `page` of `size` ids and the total count
    pub fn page(&self, pager_id: &str, page: usize, size: usize) -> Result<(Vec<String>, i64), IndexError> {
        let key = keys::search_results(pager_id);
        let total = self.store.zcard(&key)?;
        if total == 0 {
            return Err(IndexError::PagerNotFound(pager_id.to_string()));
        }
        if size == 0 {
            return Ok((Vec::new(), total));
        }
        let start = (page * size) as i64;
        let stop = start + size as i64 - 1;
        let ids = self
            .store
            .zrange(&key, start, stop)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        Ok((ids, total))
    }

    pub fn delete(&self, pager_id: &str) -> Result<bool, StoreError> {
        Ok(self.store.del(&[keys::search_results(pager_id).as_str()])? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::RecordingStore;

    #[test]
    fn test_results_expire() {
        let store = Arc::new(RecordingStore::new(0));
        let pager = Pager::new(store.clone());
        let id = pager.save(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(pager.page(&id, 0, 10).unwrap(), (vec!["a".to_string(), "b".to_string()], 2));

        store.clock().advance(SEARCH_RESULTS_TTL);
        assert!(matches!(pager.page(&id, 0, 10), Err(IndexError::PagerNotFound(_))));
    }

    #[test]
    fn test_empty_results_save_nothing() {
        let store = Arc::new(RecordingStore::new(0));
        let pager = Pager::new(store.clone());
        let id = pager.save(&[]).unwrap();
        assert!(matches!(pager.page(&id, 0, 10), Err(IndexError::PagerNotFound(_))));
    }
}
