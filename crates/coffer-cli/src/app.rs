use anyhow::Result;
use chrono::Utc;
use coffer_core::paths::{settings_path, slots_dir, sources_dir};
use coffer_core::secure_storage::{KeyStore, KeyringStore, MemoryKeyStore};
use coffer_core::settings::SearchSettings;
use coffer_core::sources::JsonFileSource;
use coffer_core::storage::FileSlotStore;
use coffer_core::{EntryType, SearchService, SourceRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Composition root: one search service plus the module sources behind it.
pub struct App {
    pub data_dir: PathBuf,
    pub service: SearchService,
    memory_keys: bool,
}

impl App {
    pub fn open(data_dir: &Path, memory_keys: bool) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let settings = SearchSettings::load(&settings_path(data_dir))?;
        let keys: Arc<dyn KeyStore> = if memory_keys {
            Arc::new(MemoryKeyStore::new())
        } else {
            Arc::new(KeyringStore::new())
        };
        let slots = Arc::new(FileSlotStore::open(slots_dir(data_dir))?);
        let service = SearchService::open(keys, slots, settings)?;

        let sources = sources_dir(data_dir);
        for entry_type in EntryType::ALL {
            service.register_source(Arc::new(JsonFileSource::in_dir(&sources, entry_type)));
        }
        debug!(data_dir = %data_dir.display(), "search service ready");

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            service,
            memory_keys,
        })
    }

    pub fn source(&self, entry_type: EntryType) -> JsonFileSource {
        JsonFileSource::in_dir(&sources_dir(&self.data_dir), entry_type)
    }

    /// Write a record to its module file. Fields are encrypted with the
    /// module cipher unless `plain` is set or keys only live in memory, since
    /// a memory key is gone once the process exits.
    pub fn add_record(
        &self,
        entry_type: EntryType,
        id: String,
        title: String,
        content: String,
        keywords: Vec<String>,
        plain: bool,
    ) -> Result<()> {
        let (raw_title, raw_content) = if plain || self.memory_keys {
            (title, content)
        } else {
            let cipher = self.service.cipher_for(entry_type.as_str());
            (cipher.encrypt_text(&title)?, cipher.encrypt_text(&content)?)
        };
        self.source(entry_type).put(SourceRecord {
            id,
            raw_title,
            raw_content,
            keywords,
            timestamp: Utc::now(),
            metadata: None,
        })?;
        Ok(())
    }

    /// Delete a record from its module file and its entry from the index.
    /// Returns false when the module has no such record.
    pub fn remove_record(&self, entry_type: EntryType, id: &str) -> Result<bool> {
        let source = self.source(entry_type);
        if !source.delete(id)? {
            return Ok(false);
        }
        self.service.index().remove(source.index_id(id));
        Ok(true)
    }
}
