use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cipher::DEFAULT_KEY_SERVICE;
use crate::recent::DEFAULT_RECENT_LIMIT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub recent_query_limit: usize,
    /// Shortest token kept when synthesizing keywords during a rebuild.
    pub keyword_min_len: usize,
    pub keyword_cap: usize,
    /// Drop index entries whose record vanished from a fully enumerated source.
    pub prune_stale_entries: bool,
    /// Service prefix for key material in the secure key store.
    pub key_service: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            recent_query_limit: DEFAULT_RECENT_LIMIT,
            keyword_min_len: 3,
            keyword_cap: 20,
            prune_stale_entries: true,
            key_service: DEFAULT_KEY_SERVICE.to_string(),
        }
    }
}

impl SearchSettings {
    /// Missing file means defaults; a malformed file is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}
