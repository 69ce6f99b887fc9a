//! Keyword relevance scoring over index entries.
//!
//! Per query token: +3 for a title match, +1 for a content match and +2 for
//! every keyword containing the token. The entry timestamp only breaks ties.

use std::cmp::Ordering;

use crate::model::{IndexEntry, SearchFilter, SearchResult};

pub const TITLE_WEIGHT: u32 = 3;
pub const CONTENT_WEIGHT: u32 = 1;
pub const KEYWORD_WEIGHT: u32 = 2;
pub const PREVIEW_CHARS: usize = 100;

/// Lowercased whitespace tokens of a query.
pub fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Raw token score of one entry; 0 means no match.
pub fn score_entry(entry: &IndexEntry, tokens: &[String]) -> u32 {
    let title = entry.title.to_lowercase();
    let content = entry.content.to_lowercase();
    let keywords: Vec<String> = entry.keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut score = 0;
    for token in tokens {
        if title.contains(token.as_str()) {
            score += TITLE_WEIGHT;
        }
        if content.contains(token.as_str()) {
            score += CONTENT_WEIGHT;
        }
        let hits = keywords.iter().filter(|k| k.contains(token.as_str())).count() as u32;
        score += KEYWORD_WEIGHT * hits;
    }
    score
}

fn ranking_key(score: u32, entry: &IndexEntry) -> f64 {
    let seconds = entry.timestamp.timestamp_millis() as f64 / 1_000.0;
    f64::from(score) + seconds / 1e9
}

fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// Filter, score and rank `entries` against `query`.
///
/// An empty query returns nothing; the index is not browsable unfiltered.
pub fn search<'a, I>(entries: I, query: &str, filter: &SearchFilter) -> Vec<SearchResult>
where
    I: IntoIterator<Item = &'a IndexEntry>,
{
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(f64, u32, &IndexEntry)> = entries
        .into_iter()
        .filter(|entry| filter.matches(entry))
        .filter_map(|entry| {
            let score = score_entry(entry, &tokens);
            (score > 0).then(|| (ranking_key(score, entry), score, entry))
        })
        .collect();

    ranked.sort_by(|(a_key, _, a), (b_key, _, b)| {
        b_key
            .partial_cmp(a_key)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    ranked
        .into_iter()
        .map(|(key, relevance, entry)| SearchResult {
            id: entry.id.clone(),
            entry_type: entry.entry_type,
            title: entry.title.clone(),
            preview: preview(&entry.content),
            timestamp: entry.timestamp,
            relevance,
            score: key,
            metadata: entry.metadata.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryType;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(id: &str, t: EntryType, title: &str, content: &str) -> IndexEntry {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        IndexEntry::new(id, t, title, content, ts)
    }

    #[test]
    fn title_outranks_content() {
        let a = entry("a", EntryType::Note, "Grocery list", "");
        let b = entry("b", EntryType::Todo, "Buy milk", "need to buy grocery items");
        let results = search([&b, &a], "grocery", &SearchFilter::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn keywords_count_per_match() {
        let e = entry("k", EntryType::Contact, "Alice", "")
            .with_keywords(["Berlin", "berlin-office", "paris"]);
        assert_eq!(score_entry(&e, &tokenize("BERLIN")), 4);
        assert_eq!(score_entry(&e, &tokenize("alice berlin")), 7);
    }

    #[test]
    fn zero_score_entries_are_dropped() {
        let e = entry("z", EntryType::Note, "nothing", "relevant");
        assert!(search([&e], "grocery", &SearchFilter::default()).is_empty());
    }

    #[test]
    fn empty_query_returns_nothing() {
        let e = entry("e", EntryType::Note, "anything", "");
        let filter = SearchFilter::default().with_types([EntryType::Note]);
        assert!(search([&e], "", &filter).is_empty());
        assert!(search([&e], "   \t", &filter).is_empty());
    }

    #[test]
    fn newer_entry_wins_equal_score() {
        let mut old = entry("old", EntryType::Note, "report", "");
        let mut new = entry("new", EntryType::Note, "report", "");
        old.timestamp = old.timestamp - Duration::days(30);
        new.timestamp = new.timestamp + Duration::days(30);
        let results = search([&old, &new], "report", &SearchFilter::default());
        assert_eq!(results[0].id, "new");
        assert_eq!(results[0].relevance, results[1].relevance);
        assert!(results[0].score > results[1].score);
        // between contemporaneous entries the timestamp never outweighs a point
        let strong = entry("strong", EntryType::Note, "report", "report");
        let results = search([&new, &strong], "report", &SearchFilter::default());
        assert_eq!(results[0].id, "strong");
        assert_eq!((results[0].relevance, results[1].relevance), (4, 3));
    }

    #[test]
    fn identical_keys_fall_back_to_id_order() {
        let b = entry("b", EntryType::Note, "same", "");
        let a = entry("a", EntryType::Note, "same", "");
        let ids: Vec<_> = search([&b, &a], "same", &SearchFilter::default())
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn preview_is_char_bounded() {
        let long = "é".repeat(150);
        let e = entry("p", EntryType::Note, "long", &long);
        let results = search([&e], "long", &SearchFilter::default());
        assert_eq!(results[0].preview.chars().count(), PREVIEW_CHARS);
    }
}
