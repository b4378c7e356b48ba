//! The persistent file index.
//!
//! A basename-keyed map from artifact identity to the last-known
//! fingerprint, downstream id, and knowledge-base binding, persisted as one
//! JSON document under the storage root. The basename key matches the
//! downstream service's flat filename namespace, so the startup re-import
//! can rebind downstream ids even when the local document was lost.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// `source` marker for entries reconstructed from the downstream listing.
/// Their fingerprints are not trustworthy for change detection.
pub const DOWNSTREAM_SOURCE: &str = "openwebui";

const INDEX_FILENAME: &str = "file_index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Full logical path last seen for this artifact.
    pub path: String,
    pub fingerprint: String,
    /// Downstream-issued artifact id from the last upload.
    pub file_id: String,
    pub source: String,
    #[serde(default)]
    pub knowledge_id: String,
    pub synced_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl IndexEntry {
    pub fn is_reimported(&self) -> bool {
        self.source == DOWNSTREAM_SOURCE
    }
}

#[derive(Debug)]
pub struct FileIndex {
    entries: HashMap<String, IndexEntry>,
    path: PathBuf,
}

impl FileIndex {
    /// Load the index from `<storage_root>/file_index.json`.
    ///
    /// An absent file is an empty index; a file that exists but does not
    /// parse is fatal.
    pub fn load(storage_root: &Path) -> SyncResult<Self> {
        let path = storage_root.join(INDEX_FILENAME);

        let entries = if path.exists() {
            let data = std::fs::read(&path).map_err(|source| SyncError::IndexIo {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_slice(&data).map_err(|source| SyncError::IndexCorrupt {
                path: path.display().to_string(),
                source,
            })?
        } else {
            HashMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "Loaded file index");
        Ok(Self { entries, path })
    }

    /// Persist the full map, writing a sibling temp file and renaming it
    /// over the document so a crash mid-write cannot corrupt it.
    pub fn save(&self) -> SyncResult<()> {
        let data = serde_json::to_vec_pretty(&self.entries).map_err(|source| {
            SyncError::IndexCorrupt {
                path: self.path.display().to_string(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        let io_err = |source| SyncError::IndexIo {
            path: self.path.display().to_string(),
            source,
        };
        std::fs::write(&tmp_path, &data).map_err(io_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), entries = self.entries.len(), "Saved file index");
        Ok(())
    }

    pub fn get(&self, basename: &str) -> Option<&IndexEntry> {
        self.entries.get(basename)
    }

    /// Content-move detection: an entry with this fingerprint under any key.
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<(&str, &IndexEntry)> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.fingerprint == fingerprint)
            .map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn insert(&mut self, basename: String, entry: IndexEntry) {
        self.entries.insert(basename, entry);
    }

    pub fn remove(&mut self, basename: &str) -> Option<IndexEntry> {
        self.entries.remove(basename)
    }

    /// Replace the whole map; used by the startup re-import.
    pub fn replace_all(&mut self, entries: HashMap<String, IndexEntry>) {
        self.entries = entries;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
