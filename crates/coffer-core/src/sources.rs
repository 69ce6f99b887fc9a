//! File-backed index source: one JSON array of records per module.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use crate::model::EntryType;
use crate::rebuild::{IndexSource, SourceError, SourceRecord};

#[derive(Debug, Clone)]
pub struct JsonFileSource {
    name: String,
    entry_type: EntryType,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(name: impl Into<String>, entry_type: EntryType, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            entry_type,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Conventional layout: `<dir>/<type>.json`, named after the type.
    pub fn in_dir(dir: &Path, entry_type: EntryType) -> Self {
        Self::new(
            entry_type.as_str(),
            entry_type,
            dir.join(format!("{}.json", entry_type.as_str())),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id this source's records carry in the index: `<type>:<id>`. Module ids
    /// are only unique within one module.
    pub fn index_id(&self, id: &str) -> String {
        format!("{}:{id}", self.entry_type)
    }

    /// Replace a record with the same id, or add it. Unparseable records
    /// already in the file are kept as they are.
    pub fn put(&self, record: SourceRecord) -> Result<(), SourceError> {
        let mut values = self.read_values()?;
        values.retain(|v| !has_id(v, &record.id));
        let value =
            serde_json::to_value(&record).map_err(|e| SourceError::Corrupt(e.to_string()))?;
        values.push(value);
        self.write(&values)
    }

    pub fn delete(&self, id: &str) -> Result<bool, SourceError> {
        let mut values = self.read_values()?;
        let before = values.len();
        values.retain(|v| !has_id(v, id));
        let removed = values.len() != before;
        if removed {
            self.write(&values)?;
        }
        Ok(removed)
    }

    /// Raw array elements; a missing file is empty, anything but an array fails.
    fn read_values(&self) -> Result<Vec<Value>, SourceError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SourceError::Unavailable(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_slice(&data)
            .map_err(|e| SourceError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    fn write(&self, values: &[Value]) -> Result<(), SourceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SourceError::Unavailable(e.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(values)
            .map_err(|e| SourceError::Corrupt(e.to_string()))?;
        fs::write(&self.path, data).map_err(|e| SourceError::Unavailable(e.to_string()))
    }
}

fn has_id(value: &Value, id: &str) -> bool {
    value.get("id").and_then(Value::as_str) == Some(id)
}

impl IndexSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// A missing file is an empty module and an unreadable or non-array file
    /// fails. Single malformed records are skipped.
    fn records(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let values = self.read_values()?;
        let mut records = Vec::with_capacity(values.len());
        for (position, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<SourceRecord>(value) {
                Ok(mut record) => {
                    record.id = self.index_id(&record.id);
                    records.push(record);
                }
                Err(err) => warn!(
                    source = %self.name,
                    position,
                    error = %err,
                    "skipping malformed record"
                ),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(id: &str, title: &str) -> SourceRecord {
        SourceRecord {
            id: id.to_string(),
            raw_title: title.to_string(),
            raw_content: String::new(),
            keywords: vec![],
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let source = JsonFileSource::in_dir(dir.path(), EntryType::Note);
        assert!(source.records().unwrap().is_empty());
        assert_eq!(source.name(), "note");
    }

    #[test]
    fn put_replaces_and_delete_removes() {
        let dir = tempdir().unwrap();
        let source = JsonFileSource::in_dir(dir.path(), EntryType::Todo);
        source.put(record("1", "first")).unwrap();
        source.put(record("1", "second")).unwrap();
        source.put(record("2", "other")).unwrap();
        let records = source.records().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.id == "todo:1" && r.raw_title == "second"));
        assert!(source.delete("1").unwrap());
        assert!(!source.delete("1").unwrap());
        assert_eq!(source.records().unwrap().len(), 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let source = JsonFileSource::in_dir(dir.path(), EntryType::Contact);
        fs::write(source.path(), b"[{").unwrap();
        assert!(matches!(source.records(), Err(SourceError::Corrupt(_))));
    }

    #[test]
    fn bad_record_does_not_hide_the_rest() {
        let dir = tempdir().unwrap();
        let source = JsonFileSource::in_dir(dir.path(), EntryType::Note);
        fs::write(
            source.path(),
            br#"[
                {"id": "1", "raw_title": "Dentist", "timestamp": "2024-06-01T08:30:00Z"},
                {"id": "2", "raw_title": "Broken", "timestamp": "yesterday"}
            ]"#,
        )
        .unwrap();

        let records = source.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "note:1");

        // rewriting the file keeps the record that failed to parse
        source.put(record("3", "Groceries")).unwrap();
        assert_eq!(source.records().unwrap().len(), 2);
        assert!(fs::read_to_string(source.path()).unwrap().contains("yesterday"));
    }

    #[test]
    fn non_array_file_is_an_error() {
        let dir = tempdir().unwrap();
        let source = JsonFileSource::in_dir(dir.path(), EntryType::Event);
        fs::write(source.path(), br#"{"id": "1"}"#).unwrap();
        assert!(matches!(source.records(), Err(SourceError::Corrupt(_))));
    }

    #[test]
    fn shared_module_ids_stay_distinct() {
        let dir = tempdir().unwrap();
        let notes = JsonFileSource::in_dir(dir.path(), EntryType::Note);
        let todos = JsonFileSource::in_dir(dir.path(), EntryType::Todo);
        notes.put(record("1", "note one")).unwrap();
        todos.put(record("1", "todo one")).unwrap();

        let note = &notes.records().unwrap()[0];
        let todo = &todos.records().unwrap()[0];
        assert_ne!(note.id, todo.id);
        assert_eq!(notes.index_id("1"), note.id);
    }
}
