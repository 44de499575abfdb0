//! Persisted name → write timestamp bookkeeping
//!
//! The manifest knows nothing about sizes or data paths. On disk it is a JSON
//! record `{"overflowPermitted": bool, "entries": [{"name", "timestamp"}]}`
//! replaced atomically on every persist.

use crate::atomic::write_atomically;
use crate::config::MANIFEST_FILE_NAME;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ManifestRecord {
    overflow_permitted: bool,
    entries: Vec<ManifestRecordEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestRecordEntry {
    name: String,
    timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    overflow_permitted: bool,
    entries: BTreeMap<String, i64>,
}

impl Manifest {
    /// An empty manifest that does not permit overflow
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path_in(cache_dir: &Path) -> PathBuf {
        cache_dir.join(MANIFEST_FILE_NAME)
    }

    /// Scratch file a persist writes before renaming it over the manifest
    pub fn temp_path_in(cache_dir: &Path) -> PathBuf {
        cache_dir.join(format!(".{}.tmp", MANIFEST_FILE_NAME))
    }

    /// Read the manifest stored in `cache_dir`, or an empty one if none exists
    pub async fn load(cache_dir: &Path) -> Result<Self> {
        let path = Self::path_in(cache_dir);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Self::decode(&path, &bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No manifest on disk, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| CacheError::CorruptManifest {
            path: path.to_path_buf(),
            reason,
        };

        let record: ManifestRecord =
            serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;

        let mut entries = BTreeMap::new();
        for entry in record.entries {
            if entries.insert(entry.name.clone(), entry.timestamp).is_some() {
                return Err(corrupt(format!("duplicate entry {:?}", entry.name)));
            }
        }

        Ok(Self {
            overflow_permitted: record.overflow_permitted,
            entries,
        })
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let record = ManifestRecord {
            overflow_permitted: self.overflow_permitted,
            entries: self
                .entries
                .iter()
                .map(|(name, &timestamp)| ManifestRecordEntry {
                    name: name.clone(),
                    timestamp,
                })
                .collect(),
        };
        serde_json::to_vec_pretty(&record).map_err(|e| CacheError::Io(Box::new(e.into())))
    }

    /// Write the manifest into `cache_dir`, atomically replacing any previous one
    pub async fn persist(&self, cache_dir: &Path) -> Result<()> {
        let path = Self::path_in(cache_dir);
        let tmp = Self::temp_path_in(cache_dir);
        let bytes = self.encode()?;
        write_atomically(&tmp, &path, &bytes).await?;
        debug!(entries = self.entries.len(), "Persisted manifest");
        Ok(())
    }

    /// Insert or update the write timestamp for `name`
    pub fn record(&mut self, name: &str, timestamp: i64) {
        self.entries.insert(name.to_string(), timestamp);
    }

    /// Drop `name`, returning its timestamp if it was present
    pub fn remove(&mut self, name: &str) -> Option<i64> {
        self.entries.remove(name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries ordered by timestamp, ties broken by name; this is eviction order
    pub fn oldest_first(&self) -> Vec<(String, i64)> {
        let mut ordered: Vec<(String, i64)> = self
            .entries
            .iter()
            .map(|(name, &timestamp)| (name.clone(), timestamp))
            .collect();
        // Name order from the BTreeMap survives the stable sort
        ordered.sort_by_key(|&(_, timestamp)| timestamp);
        ordered
    }

    /// The next eviction candidate, never `protected`
    pub fn oldest_except(&self, protected: Option<&str>) -> Option<(String, i64)> {
        self.entries
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != protected)
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(name, &timestamp)| (name.clone(), timestamp))
    }

    pub fn set_overflow_permitted(&mut self, permitted: bool) {
        self.overflow_permitted = permitted;
    }

    pub fn is_overflow_permitted(&self) -> bool {
        self.overflow_permitted
    }
}
