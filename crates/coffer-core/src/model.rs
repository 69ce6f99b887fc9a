use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Note,
    Todo,
    Contact,
    PgpMessage,
    File,
    VoiceMemo,
    Event,
    Password,
}

impl EntryType {
    pub const ALL: [EntryType; 8] = [
        EntryType::Note,
        EntryType::Todo,
        EntryType::Contact,
        EntryType::PgpMessage,
        EntryType::File,
        EntryType::VoiceMemo,
        EntryType::Event,
        EntryType::Password,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Note => "note",
            EntryType::Todo => "todo",
            EntryType::Contact => "contact",
            EntryType::PgpMessage => "pgp_message",
            EntryType::File => "file",
            EntryType::VoiceMemo => "voice_memo",
            EntryType::Event => "event",
            EntryType::Password => "password",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entry type: {s}"))
    }
}

/// One indexable item. `id` is owned by the producing module and never parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<u8>>,
}

impl IndexEntry {
    pub fn new(
        id: impl Into<String>,
        entry_type: EntryType,
        title: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            entry_type,
            title: title.into(),
            content: content.into(),
            keywords: Vec::new(),
            timestamp,
            metadata: None,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub types: Option<HashSet<EntryType>>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchFilter {
    pub fn with_types<I: IntoIterator<Item = EntryType>>(mut self, types: I) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    pub fn from(mut self, date_from: DateTime<Utc>) -> Self {
        self.date_from = Some(date_from);
        self
    }

    pub fn until(mut self, date_to: DateTime<Utc>) -> Self {
        self.date_to = Some(date_to);
        self
    }

    /// Type membership and inclusive date range.
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&entry.entry_type) {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub title: String,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
    /// Summed token weights for the query.
    pub relevance: u32,
    /// Ranking key: `relevance` plus the entry's unix seconds / 1e9, so newer
    /// entries win among equal relevance. Results are sorted by it, descending.
    pub score: f64,
    #[serde(with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entry_type_names_roundtrip() {
        for t in EntryType::ALL {
            assert_eq!(t.as_str().parse::<EntryType>().unwrap(), t);
            assert_eq!(serde_json::to_string(&t).unwrap(), format!("\"{}\"", t.as_str()));
        }
        assert!("calendar".parse::<EntryType>().is_err());
    }

    #[test]
    fn entry_without_metadata_deserializes() {
        let json = r#"{"id":"7","type":"voice_memo","title":"t","content":"c","timestamp":"2024-01-01T00:00:00Z"}"#;
        let entry: IndexEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.entry_type, EntryType::VoiceMemo);
        assert!(entry.keywords.is_empty());
        assert!(entry.metadata.is_none());
    }

    #[test]
    fn filter_date_range_is_inclusive() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let entry = IndexEntry::new("a", EntryType::Event, "standup", "", ts);
        assert!(SearchFilter::default().from(ts).until(ts).matches(&entry));
        assert!(!SearchFilter::default()
            .from(ts + chrono::Duration::seconds(1))
            .matches(&entry));
        assert!(!SearchFilter::default()
            .with_types([EntryType::Note])
            .matches(&entry));
    }
}
