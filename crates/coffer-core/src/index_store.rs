//! Encrypted, concurrently readable search index.
//!
//! Reads take a shared lock on the in-memory collection. Every mutation is
//! queued on a channel and applied by a single writer thread, which holds the
//! exclusive lock for the mutation and the snapshot write that follows it.
//! The persisted snapshot is a disposable cache: load and persist failures
//! are logged, never returned.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cipher::CipherService;
use crate::model::{EntryType, IndexEntry, SearchFilter, SearchResult};
use crate::relevance;
use crate::storage::{SlotStore, StorageError, INDEX_SNAPSHOT_KEY};

enum Command {
    Upsert(IndexEntry),
    UpsertMany(Vec<IndexEntry>),
    ReplaceSources {
        entries: Vec<IndexEntry>,
        refreshed: HashSet<EntryType>,
    },
    Remove(String),
    Clear,
    Persist,
    Flush(oneshot::Sender<()>),
}

struct Shared {
    entries: RwLock<Vec<IndexEntry>>,
    cipher: Arc<CipherService>,
    slots: Arc<dyn SlotStore>,
}

/// Handle to the index. Dropping the last handle stops the writer thread
/// after it drains the queued mutations.
pub struct IndexStore {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Command>,
}

impl IndexStore {
    /// Load the persisted snapshot (or start empty) and start the writer.
    pub fn open(
        cipher: Arc<CipherService>,
        slots: Arc<dyn SlotStore>,
    ) -> Result<Self, StorageError> {
        let entries = load(&cipher, slots.as_ref());
        info!(entries = entries.len(), "search index loaded");
        let shared = Arc::new(Shared {
            entries: RwLock::new(entries),
            cipher,
            slots,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = shared.clone();
        thread::Builder::new()
            .name("coffer-index-writer".into())
            .spawn(move || writer_loop(writer, rx))?;

        Ok(Self { shared, tx })
    }

    pub fn upsert(&self, entry: IndexEntry) {
        self.send(Command::Upsert(entry));
    }

    pub fn upsert_many(&self, entries: Vec<IndexEntry>) {
        self.send(Command::UpsertMany(entries));
    }

    /// Upsert `entries`, then drop every entry of a `refreshed` type whose id
    /// is not part of the batch.
    pub fn replace_sources(&self, entries: Vec<IndexEntry>, refreshed: HashSet<EntryType>) {
        self.send(Command::ReplaceSources { entries, refreshed });
    }

    pub fn remove(&self, id: impl Into<String>) {
        self.send(Command::Remove(id.into()));
    }

    pub fn clear(&self) {
        self.send(Command::Clear);
    }

    /// Re-write the encrypted snapshot from the current collection.
    pub fn persist(&self) {
        self.send(Command::Persist);
    }

    /// Resolves once every mutation queued before this call has been applied
    /// and persisted.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        self.send(Command::Flush(ack));
        let _ = done.await;
    }

    /// Blocking variant of [`IndexStore::flush`] for non-async callers.
    /// Must not be called from inside an async task.
    pub fn flush_blocking(&self) {
        let (ack, done) = oneshot::channel();
        self.send(Command::Flush(ack));
        let _ = done.blocking_recv();
    }

    pub fn search(&self, query: &str, filter: &SearchFilter) -> Vec<SearchResult> {
        let entries = self.shared.entries.read();
        relevance::search(entries.iter(), query, filter)
    }

    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.read().is_empty()
    }

    /// Point-in-time copy of the collection.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.shared.entries.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<IndexEntry> {
        self.shared
            .entries
            .read()
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Entry count per type.
    pub fn stats(&self) -> BTreeMap<EntryType, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.shared.entries.read().iter() {
            *counts.entry(entry.entry_type).or_insert(0) += 1;
        }
        counts
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("index writer stopped; mutation dropped");
        }
    }
}

fn writer_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.blocking_recv() {
        if let Command::Flush(ack) = command {
            let _ = ack.send(());
            continue;
        }
        let mut entries = shared.entries.write();
        match command {
            Command::Upsert(entry) => {
                upsert_all(&mut entries, vec![entry]);
            }
            Command::UpsertMany(batch) => {
                let count = batch.len();
                upsert_all(&mut entries, batch);
                debug!(batch = count, total = entries.len(), "index batch applied");
            }
            Command::ReplaceSources { entries: batch, refreshed } => {
                let seen = upsert_all(&mut entries, batch);
                let before = entries.len();
                entries.retain(|e| !refreshed.contains(&e.entry_type) || seen.contains(&e.id));
                let pruned = before - entries.len();
                if pruned > 0 {
                    info!(pruned, "stale index entries removed");
                }
            }
            Command::Remove(id) => entries.retain(|e| e.id != id),
            Command::Clear => entries.clear(),
            Command::Persist => {}
            Command::Flush(_) => unreachable!("handled above"),
        }
        persist(&shared, &entries);
    }
    debug!("index writer stopped");
}

/// Replace-by-id for a whole batch; the last duplicate inside the batch wins.
/// Returns the ids that were written.
fn upsert_all(entries: &mut Vec<IndexEntry>, batch: Vec<IndexEntry>) -> HashSet<String> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(batch.len());
    let mut latest: Vec<IndexEntry> = Vec::with_capacity(batch.len());
    for entry in batch {
        match positions.get(&entry.id) {
            Some(&i) => latest[i] = entry,
            None => {
                positions.insert(entry.id.clone(), latest.len());
                latest.push(entry);
            }
        }
    }
    entries.retain(|e| !positions.contains_key(&e.id));
    entries.extend(latest);
    positions.into_keys().collect()
}

fn persist(shared: &Shared, entries: &[IndexEntry]) {
    let plaintext = match serde_json::to_vec(entries) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "serialize index snapshot");
            return;
        }
    };
    let blob = match shared.cipher.encrypt(&plaintext) {
        Ok(blob) => blob,
        Err(err) => {
            warn!(error = %err, "encrypt index snapshot");
            return;
        }
    };
    if let Err(err) = shared.slots.set(INDEX_SNAPSHOT_KEY, &blob) {
        warn!(error = %err, "write index snapshot");
    }
}

fn load(cipher: &CipherService, slots: &dyn SlotStore) -> Vec<IndexEntry> {
    let blob = match slots.get(INDEX_SNAPSHOT_KEY) {
        Ok(Some(blob)) => blob,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!(error = %err, "read index snapshot; starting empty");
            return Vec::new();
        }
    };
    let plaintext = match cipher.decrypt(&blob) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "decrypt index snapshot; starting empty");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Vec<IndexEntry>>(&plaintext) {
        Ok(snapshot) => {
            let mut entries = Vec::with_capacity(snapshot.len());
            upsert_all(&mut entries, snapshot);
            entries
        }
        Err(err) => {
            warn!(error = %err, "parse index snapshot; starting empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{looks_encrypted, INDEX_NAMESPACE};
    use crate::secure_storage::MemoryKeyStore;
    use crate::storage::MemorySlotStore;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        keys: Arc<MemoryKeyStore>,
        slots: Arc<MemorySlotStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                keys: Arc::new(MemoryKeyStore::new()),
                slots: Arc::new(MemorySlotStore::new()),
            }
        }

        fn open(&self) -> IndexStore {
            let cipher = Arc::new(CipherService::new(INDEX_NAMESPACE, self.keys.clone()));
            IndexStore::open(cipher, self.slots.clone()).unwrap()
        }
    }

    fn note(id: &str, title: &str) -> IndexEntry {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        IndexEntry::new(id, EntryType::Note, title, "", ts)
    }

    #[tokio::test]
    async fn upsert_keeps_one_entry_per_id() {
        let fx = Fixture::new();
        let store = fx.open();
        store.upsert(note("A", "first"));
        store.upsert(note("B", "other"));
        store.upsert(note("A", "second"));
        store.flush().await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("A").unwrap().title, "second");
    }

    #[tokio::test]
    async fn upsert_many_last_duplicate_wins() {
        let fx = Fixture::new();
        let store = fx.open();
        store.upsert(note("A", "stale"));
        store.upsert_many(vec![note("A", "one"), note("B", "b"), note("A", "two")]);
        store.flush().await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("A").unwrap().title, "two");
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let fx = Fixture::new();
        let store = fx.open();
        store.upsert_many(vec![note("A", "a"), note("B", "b")]);
        store.remove("A");
        store.remove("missing");
        store.flush().await;
        assert_eq!(store.len(), 1);
        store.clear();
        store.flush().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_encrypted_and_reloaded() {
        let fx = Fixture::new();
        {
            let store = fx.open();
            store.upsert(note("A", "Grocery list"));
            store.flush().await;
        }
        let blob = fx.slots.get(INDEX_SNAPSHOT_KEY).unwrap().unwrap();
        assert!(looks_encrypted(&blob));
        assert!(!String::from_utf8_lossy(&blob).contains("Grocery"));

        let reopened = fx.open();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.search("grocery", &SearchFilter::default())[0].id, "A");
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let fx = Fixture::new();
        {
            let store = fx.open();
            store.upsert(note("A", "a"));
            store.flush().await;
        }
        let mut blob = fx.slots.get(INDEX_SNAPSHOT_KEY).unwrap().unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        fx.slots.set(INDEX_SNAPSHOT_KEY, &blob).unwrap();
        assert!(fx.open().is_empty());

        fx.slots.set(INDEX_SNAPSHOT_KEY, b"not json at all").unwrap();
        assert!(fx.open().is_empty());
    }

    #[tokio::test]
    async fn snapshot_without_key_starts_empty() {
        let fx = Fixture::new();
        {
            let store = fx.open();
            store.upsert(note("A", "a"));
            store.flush().await;
        }
        let other_keys = Arc::new(MemoryKeyStore::new());
        let cipher = Arc::new(CipherService::new(INDEX_NAMESPACE, other_keys));
        let store = IndexStore::open(cipher, fx.slots.clone()).unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn replace_sources_prunes_only_refreshed_types() {
        let fx = Fixture::new();
        let store = fx.open();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let todo = IndexEntry::new("t1", EntryType::Todo, "call bank", "", ts);
        store.upsert_many(vec![note("n1", "a"), note("n2", "b"), todo]);
        store.replace_sources(vec![note("n1", "a2")], HashSet::from([EntryType::Note]));
        store.flush().await;
        let mut ids: Vec<_> = store.entries().into_iter().map(|e| e.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["n1", "t1"]);
        assert_eq!(store.stats().get(&EntryType::Note), Some(&1));
    }

    #[test]
    fn readers_never_see_duplicates() {
        let fx = Fixture::new();
        let store = Arc::new(fx.open());
        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let entries = store.entries();
                    let ids: HashSet<_> = entries.iter().map(|e| e.id.clone()).collect();
                    assert_eq!(ids.len(), entries.len());
                }
            })
        };
        for i in 0..200 {
            store.upsert(note(&format!("id-{}", i % 7), &format!("v{i}")));
        }
        store.flush_blocking();
        reader.join().unwrap();
        assert_eq!(store.len(), 7);
    }
}
