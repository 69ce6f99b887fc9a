//! Search facade handed to the presentation layer.
//!
//! Built once by the composition root and shared by reference; owns the index
//! store, the rebuild coordinator and the query history.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cipher::{CipherService, INDEX_NAMESPACE};
use crate::index_store::IndexStore;
use crate::model::{EntryType, SearchFilter, SearchResult};
use crate::rebuild::{IndexSource, RebuildCoordinator, RebuildReport};
use crate::recent::RecentQueries;
use crate::secure_storage::KeyStore;
use crate::settings::SearchSettings;
use crate::storage::{SlotStore, StorageError};

pub struct SearchService {
    settings: SearchSettings,
    keys: Arc<dyn KeyStore>,
    ciphers: Mutex<HashMap<String, Arc<CipherService>>>,
    index: Arc<IndexStore>,
    coordinator: Arc<RebuildCoordinator>,
    recent: RecentQueries,
}

impl SearchService {
    pub fn open(
        keys: Arc<dyn KeyStore>,
        slots: Arc<dyn SlotStore>,
        settings: SearchSettings,
    ) -> Result<Self, StorageError> {
        let index_cipher = Arc::new(CipherService::with_service(
            &settings.key_service,
            INDEX_NAMESPACE,
            keys.clone(),
        ));
        let index = Arc::new(IndexStore::open(index_cipher.clone(), slots.clone())?);
        let coordinator = Arc::new(RebuildCoordinator::with_settings(index.clone(), &settings));
        let recent = RecentQueries::new(slots, settings.recent_query_limit);
        let ciphers = HashMap::from([(INDEX_NAMESPACE.to_string(), index_cipher)]);
        Ok(Self {
            settings,
            keys,
            ciphers: Mutex::new(ciphers),
            index,
            coordinator,
            recent,
        })
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<IndexStore> {
        &self.index
    }

    pub fn coordinator(&self) -> &Arc<RebuildCoordinator> {
        &self.coordinator
    }

    /// The one cipher for a module namespace. Every caller shares the same
    /// instance and its cached key.
    pub fn cipher_for(&self, namespace: &str) -> Arc<CipherService> {
        self.ciphers
            .lock()
            .entry(namespace.to_string())
            .or_insert_with(|| {
                Arc::new(CipherService::with_service(
                    &self.settings.key_service,
                    namespace,
                    self.keys.clone(),
                ))
            })
            .clone()
    }

    /// Register a module whose encrypted fields use the namespace named
    /// after the source.
    pub fn register_source(&self, source: Arc<dyn IndexSource>) {
        let cipher = self.cipher_for(source.name());
        self.coordinator.register(source, Some(cipher));
    }

    pub fn search(&self, query: &str, filter: &SearchFilter) -> Vec<SearchResult> {
        self.index.search(query, filter)
    }

    pub fn recent_queries(&self) -> Vec<String> {
        self.recent.list()
    }

    pub fn record_query(&self, query: &str) -> Result<(), StorageError> {
        self.recent.record(query)
    }

    pub fn clear_recent_queries(&self) -> Result<(), StorageError> {
        self.recent.clear()
    }

    /// Synchronous rebuild; blocks the calling thread.
    pub fn rebuild(&self) -> RebuildReport {
        self.coordinator.rebuild_full()
    }

    pub fn spawn_rebuild(&self) -> JoinHandle<RebuildReport> {
        self.coordinator.spawn_rebuild()
    }

    pub fn stats(&self) -> BTreeMap<EntryType, usize> {
        self.index.stats()
    }

    /// Drop every index entry. Module data is untouched; a rebuild restores it.
    pub fn reset_index(&self) {
        self.index.clear();
    }
}
