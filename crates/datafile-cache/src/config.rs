//! Cache configuration

use crate::error::{CacheError, Result};
use std::path::PathBuf;

/// Ceiling value meaning "no size limit"
pub const UNBOUNDED: u64 = u64::MAX;

pub const DEFAULT_SUBDIRECTORY: &str = "DatafileCache";
pub const DATA_DIR_NAME: &str = "data";
pub const MANIFEST_FILE_NAME: &str = "dataTimestamps.json";

/// Where a cache lives and how large it may grow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub subdirectory: String,
    /// Maximum total footprint in bytes, or [`UNBOUNDED`]
    pub ceiling: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
            subdirectory: DEFAULT_SUBDIRECTORY.to_string(),
            ceiling: UNBOUNDED,
        }
    }
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>, subdirectory: impl Into<String>, ceiling: u64) -> Self {
        Self {
            root: root.into(),
            subdirectory: subdirectory.into(),
            ceiling,
        }
    }

    /// Load configuration from `DATAFILE_CACHE_DIR`, `DATAFILE_CACHE_SUBDIR`
    /// and `DATAFILE_CACHE_MAX_BYTES`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let root = lookup("DATAFILE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.root);

        let subdirectory = lookup("DATAFILE_CACHE_SUBDIR").unwrap_or(defaults.subdirectory);

        let ceiling = match lookup("DATAFILE_CACHE_MAX_BYTES") {
            Some(raw) => parse_ceiling(&raw)?,
            None => defaults.ceiling,
        };

        Ok(Self {
            root,
            subdirectory,
            ceiling,
        })
    }

    /// The cache root: `root/subdirectory`
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.subdirectory)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.cache_dir().join(DATA_DIR_NAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.cache_dir().join(MANIFEST_FILE_NAME)
    }
}

fn parse_ceiling(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unbounded") {
        return Ok(UNBOUNDED);
    }
    raw.parse::<u64>().map_err(|e| {
        CacheError::Config(format!("invalid DATAFILE_CACHE_MAX_BYTES {:?}: {}", raw, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.subdirectory, "DatafileCache");
        assert_eq!(config.ceiling, UNBOUNDED);
    }

    #[test]
    fn test_layout_paths() {
        let config = CacheConfig::new("/var/cache/app", "sounds", 1024);
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/app/sounds"));
        assert_eq!(config.data_dir(), PathBuf::from("/var/cache/app/sounds/data"));
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("/var/cache/app/sounds/dataTimestamps.json")
        );
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("DATAFILE_CACHE_DIR", "/tmp/x"),
            ("DATAFILE_CACHE_SUBDIR", "blobs"),
            ("DATAFILE_CACHE_MAX_BYTES", "4096"),
        ]))
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/x"));
        assert_eq!(config.subdirectory, "blobs");
        assert_eq!(config.ceiling, 4096);
    }

    #[test]
    fn test_from_lookup_unbounded() {
        let config =
            CacheConfig::from_lookup(lookup_from(&[("DATAFILE_CACHE_MAX_BYTES", "Unbounded")]))
                .unwrap();
        assert_eq!(config.ceiling, UNBOUNDED);
        assert_eq!(config.subdirectory, DEFAULT_SUBDIRECTORY);
    }

    #[test]
    fn test_from_lookup_bad_size() {
        let result =
            CacheConfig::from_lookup(lookup_from(&[("DATAFILE_CACHE_MAX_BYTES", "lots")]));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
