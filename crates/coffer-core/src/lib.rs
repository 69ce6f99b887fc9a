//! coffer-core: encryption at rest and the unified vault search index.
//!
//! # Module layout
//! - `secure_storage` : key-store capability (OS keyring, in-memory)
//! - `cipher`         : per-namespace XChaCha20-Poly1305 envelopes
//! - `storage`        : named value slots (index snapshot, query history)
//! - `model`          : index entries, filters, results
//! - `relevance`      : scoring and ranking
//! - `index_store`    : encrypted in-memory index with a single writer
//! - `rebuild`        : full rebuild across module sources
//! - `sources`        : JSON file source adapter
//! - `recent`         : recent query history
//! - `service`        : search facade
//! - `settings`, `paths` : configuration

pub mod cipher;
pub mod error;
pub mod index_store;
pub mod model;
pub mod paths;
pub mod rebuild;
pub mod recent;
pub mod relevance;
pub mod secure_storage;
pub mod service;
pub mod settings;
pub mod sources;
pub mod storage;

pub use cipher::CipherService;
pub use error::CipherError;
pub use index_store::IndexStore;
pub use model::{EntryType, IndexEntry, SearchFilter, SearchResult};
pub use rebuild::{IndexSource, RebuildCoordinator, RebuildReport, SourceError, SourceRecord};
pub use service::SearchService;
