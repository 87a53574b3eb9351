//! Searchable trigger index
//!
//! Kept in memory per process and refreshed from the dirty-trigger set, so
//! it lags behind trigger saves by at most one reindex interval. Search
//! results can be saved as a pager and read back page by page.

pub mod pager;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::database::{Database, DbError};
use crate::model::Trigger;
use crate::runtime::Shutdown;
use crate::store::StoreError;

pub use pager::{Pager, SEARCH_RESULTS_TTL};

/// Dirty marks older than this are dropped after a reindex, seconds
const DIRTY_RETENTION: i64 = 60 * 60;

/// Index errors
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("search results {0} not found")]
    PagerNotFound(String),
}

#[derive(Debug, Clone)]
struct Document {
    id: String,
    name: String,
    /// Lowercased name and description
    text: String,
    tags: Vec<String>,
}

impl From<&Trigger> for Document {
    fn from(trigger: &Trigger) -> Self {
        let text = format!("{} {}", trigger.name, trigger.desc.as_deref().unwrap_or("")).to_lowercase();
        Self {
            id: trigger.id.clone(),
            name: trigger.name.clone(),
            text,
            tags: trigger.tags.clone(),
        }
    }
}

/// Search filters
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Every word must appear in the name or description, ignoring case
    pub text: String,
    /// The trigger must carry all of these tags
    pub tags: Vec<String>,
    /// Only triggers whose last check scored above zero
    pub only_problems: bool,
}

/// One page of search results
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub trigger_ids: Vec<String>,
    pub total: i64,
    /// Set when the results were saved for paging
    pub pager_id: Option<String>,
}

pub struct TriggerIndex {
    database: Arc<Database>,
    documents: RwLock<HashMap<String, Document>>,
    last_reindex: Mutex<i64>,
    pager: Pager,
}

impl TriggerIndex {
    /// Create a new, empty index
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            pager: Pager::new(database.store().clone()),
            database,
            documents: RwLock::new(HashMap::new()),
            last_reindex: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Load every trigger
    pub fn rebuild(&self) -> Result<usize, IndexError> {
        let now = self.database.now();
        let ids = self.database.trigger_ids(None)?;
        let documents: HashMap<String, Document> = self
            .database
            .get_triggers(&ids)?
            .iter()
            .flatten()
            .map(|t| (t.id.clone(), Document::from(t)))
            .collect();
        let count = documents.len();
        *self.documents.write() = documents;
        *self.last_reindex.lock() = now;
        tracing::info!(triggers = count, "Search index built");
        Ok(count)
    }

    /// Apply trigger saves and removals marked since the last reindex
    pub fn reindex(&self) -> Result<usize, IndexError> {
        let now = self.database.now();
        let since = *self.last_reindex.lock();
        let mut ids = self.database.fetch_dirty_since(since)?;
        ids.sort();
        ids.dedup();

        if !ids.is_empty() {
            let triggers = self.database.get_triggers(&ids)?;
            let mut documents = self.documents.write();
            for (id, trigger) in ids.iter().zip(triggers) {
                match trigger {
                    Some(trigger) => {
                        documents.insert(id.clone(), Document::from(&trigger));
                    }
                    None => {
                        documents.remove(id);
                    }
                }
            }
            tracing::debug!(triggers = ids.len(), "Search index updated");
        }
        *self.last_reindex.lock() = now;
        self.database.remove_dirty_up_to(now - DIRTY_RETENTION)?;
        Ok(ids.len())
    }

    /// Matching trigger ids, worst check score first, then by name
    pub fn find(&self, query: &SearchQuery) -> Result<Vec<String>, IndexError> {
        let words: Vec<String> = query.text.split_whitespace().map(str::to_lowercase).collect();
        let problems: Option<HashSet<String>> = if query.only_problems {
            Some(self.database.bad_state_trigger_ids()?.into_iter().collect())
        } else {
            None
        };

        let mut found: Vec<(String, String)> = self
            .documents
            .read()
            .values()
            .filter(|doc| query.tags.iter().all(|t| doc.tags.contains(t)))
            .filter(|doc| words.iter().all(|w| doc.text.contains(w.as_str())))
            .filter(|doc| problems.as_ref().map(|p| p.contains(&doc.id)).unwrap_or(true))
            .map(|doc| (doc.id.clone(), doc.name.clone()))
            .collect();

        let ids: Vec<String> = found.iter().map(|(id, _)| id.clone()).collect();
        let scores: HashMap<String, i64> = ids
            .iter()
            .cloned()
            .zip(self.database.get_last_checks(&ids)?)
            .map(|(id, check)| (id, check.map(|c| c.score).unwrap_or(0)))
            .collect();
        found.sort_by(|(a_id, a_name), (b_id, b_name)| {
            let a_score = scores.get(a_id).copied().unwrap_or(0);
            let b_score = scores.get(b_id).copied().unwrap_or(0);
            b_score
                .cmp(&a_score)
                .then_with(|| a_name.cmp(b_name))
                .then_with(|| a_id.cmp(b_id))
        });
        Ok(found.into_iter().map(|(id, _)| id).collect())
    }

    /// Search and return page `page` of `size` results. With `save` the
    /// full result list is kept for later paging.
    pub fn search(&self, query: &SearchQuery, page: usize, size: usize, save: bool) -> Result<SearchPage, IndexError> {
        let ids = self.find(query)?;
        let total = ids.len() as i64;
        let pager_id = if save { Some(self.pager.save(&ids)?) } else { None };
        let trigger_ids = ids.into_iter().skip(page * size).take(size).collect();
        Ok(SearchPage {
            trigger_ids,
            total,
            pager_id,
        })
    }

    /// A page of previously saved results
    pub fn page(&self, pager_id: &str, page: usize, size: usize) -> Result<SearchPage, IndexError> {
        let (trigger_ids, total) = self.pager.page(pager_id, page, size)?;
        Ok(SearchPage {
            trigger_ids,
            total,
            pager_id: Some(pager_id.to_string()),
        })
    }

    pub fn delete_pager(&self, pager_id: &str) -> Result<bool, IndexError> {
        Ok(self.pager.delete(pager_id)?)
    }

    /// Build the index, then keep it current until shutdown
    pub fn start(self: Arc<Self>, interval: Duration, mut shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.rebuild() {
                tracing::error!(error = %e, "Failed to build search index");
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.reindex() {
                            tracing::error!(error = %e, "Search reindex failed");
                        }
                    }
                    _ = shutdown.wait() => {
                        tracing::info!("Search index shutting down");
                        break;
                    }
                }
            }
        })
    }
}
