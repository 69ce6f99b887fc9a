use chrono::{Duration, TimeZone, Utc};
use coffer_core::cipher::INDEX_NAMESPACE;
use coffer_core::secure_storage::MemoryKeyStore;
use coffer_core::settings::SearchSettings;
use coffer_core::storage::{FileSlotStore, MemorySlotStore};
use coffer_core::{CipherService, EntryType, IndexEntry, IndexStore, SearchFilter, SearchService};
use std::sync::Arc;
use tempfile::tempdir;

fn open_store() -> IndexStore {
    let cipher = Arc::new(CipherService::new(INDEX_NAMESPACE, Arc::new(MemoryKeyStore::new())));
    IndexStore::open(cipher, Arc::new(MemorySlotStore::new())).unwrap()
}

fn entry(id: &str, t: EntryType, title: &str, content: &str) -> IndexEntry {
    let ts = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
    IndexEntry::new(id, t, title, content, ts)
}

#[tokio::test]
async fn duplicate_ids_collapse_in_any_order() {
    let orders = [["A1", "A2", "B"], ["A1", "B", "A2"], ["B", "A1", "A2"]];
    for order in orders {
        let store = open_store();
        for tag in order {
            let id = &tag[..1];
            store.upsert(entry(id, EntryType::Note, tag, ""));
        }
        store.flush().await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("A").unwrap().title, "A2");
    }
}

#[tokio::test]
async fn type_filter_keeps_only_members() {
    let store = open_store();
    store.upsert_many(vec![
        entry("n", EntryType::Note, "budget", ""),
        entry("t", EntryType::Todo, "budget review", ""),
    ]);
    store.flush().await;

    let filter = SearchFilter::default().with_types([EntryType::Note]);
    let results = store.search("budget", &filter);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry_type, EntryType::Note);
}

#[tokio::test]
async fn date_from_after_everything_is_empty() {
    let store = open_store();
    let e = entry("n", EntryType::Note, "budget", "");
    let after = e.timestamp + Duration::minutes(1);
    store.upsert(e);
    store.flush().await;

    assert!(store.search("budget", &SearchFilter::default().from(after)).is_empty());
    assert_eq!(store.search("budget", &SearchFilter::default()).len(), 1);
}

#[tokio::test]
async fn grocery_title_ranks_above_content() {
    let store = open_store();
    store.upsert(entry("B", EntryType::Todo, "Buy milk", "need to buy grocery items"));
    store.upsert(entry("A", EntryType::Note, "Grocery list", ""));
    store.flush().await;

    let results = store.search("grocery", &SearchFilter::default());
    let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!((results[0].relevance, results[1].relevance), (3, 1));
    assert!(results[0].score > results[1].score);
    assert_eq!(results[1].preview, "need to buy grocery items");
}

#[tokio::test]
async fn empty_query_with_satisfied_filter_is_empty() {
    let store = open_store();
    store.upsert(entry("n", EntryType::Note, "anything", "at all"));
    store.flush().await;
    let filter = SearchFilter::default().with_types(EntryType::ALL);
    assert!(store.search("", &filter).is_empty());
}

#[tokio::test]
async fn service_persists_across_restarts_on_disk() {
    let dir = tempdir().unwrap();
    let keys = Arc::new(MemoryKeyStore::new());
    {
        let slots = Arc::new(FileSlotStore::open(dir.path()).unwrap());
        let service = SearchService::open(keys.clone(), slots, SearchSettings::default()).unwrap();
        service.index().upsert(entry("p1", EntryType::Password, "Bank login", ""));
        service.index().flush().await;
        service.record_query("bank").unwrap();
    }

    let slots = Arc::new(FileSlotStore::open(dir.path()).unwrap());
    let service = SearchService::open(keys, slots, SearchSettings::default()).unwrap();
    assert_eq!(service.search("bank", &SearchFilter::default())[0].id, "p1");
    assert_eq!(service.recent_queries(), vec!["bank"]);
    assert_eq!(service.stats().get(&EntryType::Password), Some(&1));

    service.reset_index();
    service.index().flush().await;
    assert!(service.search("bank", &SearchFilter::default()).is_empty());
}
