//! Recent search queries, most recent first.
//!
//! Stored unencrypted: the list is usage metadata, not vault content.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use crate::storage::{SlotStore, StorageError, RECENT_QUERIES_KEY};

pub const DEFAULT_RECENT_LIMIT: usize = 10;

pub struct RecentQueries {
    slots: Arc<dyn SlotStore>,
    limit: usize,
    lock: Mutex<()>,
}

impl RecentQueries {
    pub fn new(slots: Arc<dyn SlotStore>, limit: usize) -> Self {
        Self {
            slots,
            limit: limit.max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Unreadable history is reported as empty.
    pub fn list(&self) -> Vec<String> {
        match self.read() {
            Ok(mut queries) => {
                queries.truncate(self.limit);
                queries
            }
            Err(err) => {
                warn!(error = %err, "read recent queries");
                Vec::new()
            }
        }
    }

    /// Move `query` to the front, dropping case-insensitive duplicates and
    /// anything past the limit. Blank queries are ignored.
    pub fn record(&self, query: &str) -> Result<(), StorageError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock();
        let mut queries = self.read().unwrap_or_default();
        let folded = query.to_lowercase();
        queries.retain(|q| q.to_lowercase() != folded);
        queries.insert(0, query.to_string());
        queries.truncate(self.limit);
        self.slots
            .set(RECENT_QUERIES_KEY, &serde_json::to_vec(&queries)?)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        self.slots.remove(RECENT_QUERIES_KEY)
    }

    fn read(&self) -> Result<Vec<String>, StorageError> {
        match self.slots.get(RECENT_QUERIES_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}
