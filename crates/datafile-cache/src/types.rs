//! Cache types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Accounting view of one cached object, computed on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub name: String,
    pub path: PathBuf,
    /// Logical byte length of the data file
    pub len: u64,
    /// Length plus filesystem metadata overhead
    pub footprint: u64,
    /// Seconds since epoch of the most recent write
    pub written_at: i64,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub ceiling: u64,
    /// Objects evicted since the store was opened
    pub evictions: u64,
}

/// How a save treats existing objects and a full budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Replace an object that is already cached
    pub overwrite: bool,
    /// Overrides the manifest's overflow policy for this write only
    pub allow_overflow: Option<bool>,
}

impl SaveOptions {
    pub fn overwrite() -> Self {
        Self {
            overwrite: true,
            allow_overflow: None,
        }
    }

    pub fn allow_overflow(mut self, allow: bool) -> Self {
        self.allow_overflow = Some(allow);
        self
    }
}

/// Result of a successful save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The write pushed the cache past its ceiling
    pub overflowed: bool,
    /// Names evicted to make room, oldest first
    pub evicted: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.used_bytes, 0);
        assert_eq!(stats.free_bytes, 0);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_save_options_builders() {
        let options = SaveOptions::default();
        assert!(!options.overwrite);
        assert_eq!(options.allow_overflow, None);

        let options = SaveOptions::overwrite().allow_overflow(true);
        assert!(options.overwrite);
        assert_eq!(options.allow_overflow, Some(true));
    }

    #[test]
    fn test_stored_object_serialization() {
        let object = StoredObject {
            name: "tone.aif".to_string(),
            path: PathBuf::from("/cache/data/tone.aif"),
            len: 12345,
            footprint: 16384,
            written_at: 1_700_000_000,
        };

        let json = serde_json::to_string(&object).unwrap();
        assert!(json.contains("tone.aif"));
        assert!(json.contains("16384"));

        let deserialized: StoredObject = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, object);
    }
}
