//! Full index rebuild from every registered module.
//!
//! Each source is enumerated independently. A source that fails (error or
//! panic) contributes nothing to this pass and its entries are left as they
//! are; the other sources are still indexed. All entries are applied to the
//! store as one batch at the end.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cipher::{looks_encrypted_text, CipherService};
use crate::index_store::IndexStore;
use crate::model::{EntryType, IndexEntry};
use crate::settings::SearchSettings;

/// A record as handed over by a module. Title and content may be plaintext
/// or base64 envelopes from the module's own cipher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub raw_title: String,
    #[serde(default)]
    pub raw_content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("source data corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A module that can enumerate its indexable records.
pub trait IndexSource: Send + Sync {
    fn name(&self) -> &str;

    fn entry_type(&self) -> EntryType;

    fn records(&self) -> Result<Vec<SourceRecord>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordPolicy {
    pub min_len: usize,
    pub cap: usize,
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        Self { min_len: 3, cap: 20 }
    }
}

impl KeywordPolicy {
    /// Record keywords first, then tokens from `text`, case-insensitively
    /// deduplicated and capped.
    pub fn keywords(&self, provided: &[String], text: &[&str]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let provided = provided
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let synthesized = text
            .iter()
            .flat_map(|t| t.split_whitespace())
            .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|token| token.chars().count() >= self.min_len);

        for keyword in provided.chain(synthesized) {
            if out.len() >= self.cap {
                break;
            }
            if seen.insert(keyword.to_lowercase()) {
                out.push(keyword);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub entry_type: EntryType,
    pub entries: usize,
    /// Fields that looked encrypted but could not be decrypted.
    pub undecryptable_fields: usize,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    pub pruned_types: Vec<EntryType>,
    pub sources: Vec<SourceOutcome>,
    pub elapsed_ms: u128,
}

impl RebuildReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| !s.succeeded())
    }
}

struct Registration {
    source: Arc<dyn IndexSource>,
    cipher: Option<Arc<CipherService>>,
}

pub struct RebuildCoordinator {
    store: Arc<IndexStore>,
    sources: RwLock<Vec<Registration>>,
    keywords: KeywordPolicy,
    prune_stale: bool,
    running: Mutex<()>,
}

impl RebuildCoordinator {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self {
            store,
            sources: RwLock::new(Vec::new()),
            keywords: KeywordPolicy::default(),
            prune_stale: true,
            running: Mutex::new(()),
        }
    }

    pub fn with_settings(store: Arc<IndexStore>, settings: &SearchSettings) -> Self {
        Self {
            keywords: KeywordPolicy {
                min_len: settings.keyword_min_len,
                cap: settings.keyword_cap,
            },
            prune_stale: settings.prune_stale_entries,
            ..Self::new(store)
        }
    }

    /// Register a module. `cipher` is the module's own namespace cipher, used
    /// to decrypt fields that look encrypted.
    pub fn register(&self, source: Arc<dyn IndexSource>, cipher: Option<Arc<CipherService>>) {
        debug!(source = source.name(), "index source registered");
        self.sources.write().push(Registration { source, cipher });
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    /// Enumerate every source and apply the merged entries as one batch.
    ///
    /// Rebuilds are serialized: a concurrent caller waits for the running
    /// pass to finish. Blocks on module IO; call it off the interactive path
    /// (see [`RebuildCoordinator::spawn_rebuild`]).
    pub fn rebuild_full(&self) -> RebuildReport {
        let _running = self.running.lock();
        let started = Instant::now();
        let sources = self.sources.read();

        let mut all_entries = Vec::new();
        let mut outcomes = Vec::with_capacity(sources.len());
        for registration in sources.iter() {
            let (entries, outcome) = self.collect(registration);
            all_entries.extend(entries);
            outcomes.push(outcome);
        }

        let failed_types: HashSet<EntryType> = outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.entry_type)
            .collect();
        let refreshed: HashSet<EntryType> = outcomes
            .iter()
            .filter(|o| o.succeeded() && !failed_types.contains(&o.entry_type))
            .map(|o| o.entry_type)
            .collect();

        let indexed = all_entries.len();
        let mut pruned_types: Vec<EntryType> = Vec::new();
        if self.prune_stale {
            pruned_types = refreshed.iter().copied().collect();
            pruned_types.sort();
            self.store.replace_sources(all_entries, refreshed);
        } else {
            self.store.upsert_many(all_entries);
        }

        let report = RebuildReport {
            indexed,
            pruned_types,
            sources: outcomes,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            indexed = report.indexed,
            failed = report.failed_sources().count(),
            elapsed_ms = report.elapsed_ms as u64,
            "index rebuild finished"
        );
        report
    }

    /// Run [`RebuildCoordinator::rebuild_full`] on the blocking thread pool.
    pub fn spawn_rebuild(self: &Arc<Self>) -> JoinHandle<RebuildReport> {
        let coordinator = self.clone();
        tokio::task::spawn_blocking(move || coordinator.rebuild_full())
    }

    fn collect(&self, registration: &Registration) -> (Vec<IndexEntry>, SourceOutcome) {
        let source = registration.source.as_ref();
        let mut outcome = SourceOutcome {
            source: source.name().to_string(),
            entry_type: source.entry_type(),
            entries: 0,
            undecryptable_fields: 0,
            error: None,
        };

        let records = match panic::catch_unwind(AssertUnwindSafe(|| source.records())) {
            Ok(Ok(records)) => records,
            Ok(Err(err)) => {
                warn!(source = source.name(), error = %err, "source enumeration failed");
                outcome.error = Some(err.to_string());
                return (Vec::new(), outcome);
            }
            Err(_) => {
                warn!(source = source.name(), "source enumeration panicked");
                outcome.error = Some("enumeration panicked".to_string());
                return (Vec::new(), outcome);
            }
        };

        let cipher = registration.cipher.as_deref();
        let entries: Vec<IndexEntry> = records
            .into_iter()
            .map(|record| {
                let title = reveal(cipher, &record.raw_title, &mut outcome, &record.id);
                let content = reveal(cipher, &record.raw_content, &mut outcome, &record.id);
                let keywords = self.keywords.keywords(&record.keywords, &[&title, &content]);
                IndexEntry {
                    id: record.id,
                    entry_type: outcome.entry_type,
                    title,
                    content,
                    keywords,
                    timestamp: record.timestamp,
                    metadata: record.metadata,
                }
            })
            .collect();

        outcome.entries = entries.len();
        debug!(source = source.name(), entries = outcome.entries, "source collected");
        (entries, outcome)
    }
}

/// Decrypt a field if it looks like an envelope; fall back to the raw value.
fn reveal(
    cipher: Option<&CipherService>,
    raw: &str,
    outcome: &mut SourceOutcome,
    record_id: &str,
) -> String {
    if !looks_encrypted_text(raw) {
        return raw.to_string();
    }
    let Some(cipher) = cipher else {
        outcome.undecryptable_fields += 1;
        return raw.to_string();
    };
    match cipher.decrypt_text(raw) {
        Ok(plain) => plain,
        Err(err) => {
            warn!(
                source = %outcome.source,
                record = record_id,
                error = %err,
                "field decrypt failed; indexing raw value"
            );
            outcome.undecryptable_fields += 1;
            raw.to_string()
        }
    }
}
