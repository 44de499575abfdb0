//! The cache store
//!
//! Owns one cache root (`<root>/<subdirectory>` holding a `data` directory
//! and the manifest file), the in-memory manifest, and the size budget.
//! Every operation takes the same async mutex, so operations against one
//! store run one at a time in the order they were submitted.

use crate::accountant::SizeAccountant;
use crate::atomic::write_atomically;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::manifest::Manifest;
use crate::types::{CacheStats, SaveOptions, SaveOutcome, StoredObject};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Names starting with this prefix are reserved for in-flight writes
const TEMP_PREFIX: &str = ".partial-";
const TEMP_FILE_NAME: &str = ".partial-write";

struct StoreState {
    manifest: Manifest,
    evictions: u64,
    closed: bool,
}

/// Result of an eviction run
struct Eviction {
    evicted: Vec<String>,
    free: u64,
}

/// Size-bounded persistent data file cache
pub struct CacheStore {
    config: CacheConfig,
    cache_dir: PathBuf,
    data_dir: PathBuf,
    accountant: SizeAccountant,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
}

impl CacheStore {
    /// Open the cache described by `config` with no metadata overhead and the
    /// system clock
    pub async fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with(config, SizeAccountant::default(), Arc::new(SystemClock)).await
    }

    /// Open the cache, creating its directories if needed and reconciling the
    /// manifest against the data directory.
    ///
    /// Manifest entries without a backing file are dropped and data files
    /// without a manifest entry are deleted.
    pub async fn open_with(
        config: CacheConfig,
        accountant: SizeAccountant,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let cache_dir = config.cache_dir();
        let data_dir = config.data_dir();

        fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| CacheError::DirectoryCreate {
                path: data_dir.clone(),
                source: Box::new(e),
            })?;

        remove_stale_manifest_temp(&cache_dir).await?;

        let mut manifest = Manifest::load(&cache_dir).await?;
        if reconcile(&data_dir, &mut manifest).await? {
            manifest.persist(&cache_dir).await?;
        }

        info!(
            cache_dir = %cache_dir.display(),
            entries = manifest.len(),
            ceiling = config.ceiling,
            overflow_permitted = manifest.is_overflow_permitted(),
            "Opened data file cache"
        );

        Ok(Self {
            config,
            cache_dir,
            data_dir,
            accountant,
            clock,
            state: Mutex::new(StoreState {
                manifest,
                evictions: 0,
                closed: false,
            }),
        })
    }

    /// Close the store; every later operation fails with [`CacheError::Closed`]
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if !state.closed {
            state.closed = true;
            info!(cache_dir = %self.cache_dir.display(), "Closed data file cache");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    async fn lock_open(&self) -> Result<MutexGuard<'_, StoreState>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(CacheError::Closed);
        }
        Ok(state)
    }

    /// Save a new object; fails if `name` is already cached
    pub async fn save(&self, name: &str, data: &[u8]) -> Result<SaveOutcome> {
        self.save_with(name, data, SaveOptions::default()).await
    }

    /// Save `name`, replacing any cached version
    pub async fn overwrite(&self, name: &str, data: &[u8]) -> Result<SaveOutcome> {
        self.save_with(name, data, SaveOptions::overwrite()).await
    }

    /// Save `name`, evicting the oldest objects until it fits.
    ///
    /// When eviction runs out of candidates the write still happens if
    /// overflow is permitted (`options.allow_overflow`, else the manifest
    /// policy) and the outcome reports `overflowed`. Otherwise the save fails
    /// with [`CacheError::CacheFull`]; objects already evicted stay evicted.
    pub async fn save_with(
        &self,
        name: &str,
        data: &[u8],
        options: SaveOptions,
    ) -> Result<SaveOutcome> {
        validate_name(name)?;
        let mut state = self.lock_open().await?;

        if !options.overwrite && state.manifest.contains(name) {
            return Err(CacheError::AlreadyExists(name.to_string()));
        }

        let required = self.accountant.estimated_footprint(data.len() as u64);
        let eviction = self.evict_for(&mut state, required, Some(name)).await?;

        let mut overflowed = false;
        if required > eviction.free {
            let permitted = options
                .allow_overflow
                .unwrap_or_else(|| state.manifest.is_overflow_permitted());
            if !permitted {
                warn!(name, required, free = eviction.free, "Cache full, write refused");
                return Err(CacheError::CacheFull {
                    name: name.to_string(),
                    required,
                    free: eviction.free,
                });
            }
            warn!(name, required, free = eviction.free, "Writing past cache ceiling");
            overflowed = true;
        }

        self.write_entry(&mut state, name, data).await?;
        debug!(name, bytes = data.len(), overflowed, "Saved data file");

        Ok(SaveOutcome {
            overflowed,
            evicted: eviction.evicted,
        })
    }

    /// Write the data file, then record and persist its timestamp. A failed
    /// persist rolls the in-memory manifest back to match the disk.
    async fn write_entry(&self, state: &mut StoreState, name: &str, data: &[u8]) -> Result<()> {
        let dest = self.data_dir.join(name);
        let tmp = self.data_dir.join(TEMP_FILE_NAME);
        write_atomically(&tmp, &dest, data).await?;

        let previous = state.manifest.get(name);
        state.manifest.record(name, self.clock.now());

        if let Err(e) = state.manifest.persist(&self.cache_dir).await {
            match previous {
                Some(timestamp) => state.manifest.record(name, timestamp),
                None => {
                    state.manifest.remove(name);
                    if let Err(remove_err) = remove_if_present(&dest).await {
                        warn!(
                            path = %dest.display(),
                            error = %remove_err,
                            "Failed to remove data file after manifest write failed"
                        );
                    }
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove `name`; returns whether it was cached
    pub async fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let mut state = self.lock_open().await?;

        remove_if_present(&self.data_dir.join(name)).await?;
        let existed = state.manifest.remove(name).is_some();
        if existed {
            state.manifest.persist(&self.cache_dir).await?;
            debug!(name, "Deleted data file");
        }
        Ok(existed)
    }

    pub async fn is_cached(&self, name: &str) -> Result<bool> {
        let state = self.lock_open().await?;
        Ok(validate_name(name).is_ok() && state.manifest.contains(name))
    }

    /// Location of a cached object's data file
    pub async fn path_for(&self, name: &str) -> Result<PathBuf> {
        let state = self.lock_open().await?;
        if validate_name(name).is_err() || !state.manifest.contains(name) {
            return Err(CacheError::NotFound(name.to_string()));
        }
        Ok(self.data_dir.join(name))
    }

    /// Contents of a cached object
    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let state = self.lock_open().await?;
        if validate_name(name).is_err() || !state.manifest.contains(name) {
            return Err(CacheError::NotFound(name.to_string()));
        }
        Ok(fs::read(self.data_dir.join(name)).await?)
    }

    /// Ceiling minus the current footprint of every cached object, never below 0
    pub async fn current_free_bytes(&self) -> Result<u64> {
        let state = self.lock_open().await?;
        let used = self.used_bytes(&state.manifest, None).await?;
        Ok(SizeAccountant::free_bytes(self.config.ceiling, used))
    }

    pub async fn are_bytes_available(&self, bytes: u64) -> Result<bool> {
        Ok(bytes <= self.current_free_bytes().await?)
    }

    /// Evict oldest-first until `bytes` are free; returns whether that worked
    pub async fn make_bytes_available(&self, bytes: u64) -> Result<bool> {
        let mut state = self.lock_open().await?;
        let eviction = self.evict_for(&mut state, bytes, None).await?;
        Ok(bytes <= eviction.free)
    }

    /// Delete every data file and empty the manifest; the overflow policy is kept
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.lock_open().await?;

        let mut dir = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                remove_if_present(&entry.path()).await?;
            }
        }

        let removed = state.manifest.len();
        state.manifest.clear();
        state.manifest.persist(&self.cache_dir).await?;

        info!(cache_dir = %self.cache_dir.display(), removed, "Cleared data file cache");
        Ok(())
    }

    pub async fn set_overflow_permitted(&self, permitted: bool) -> Result<()> {
        let mut state = self.lock_open().await?;
        if state.manifest.is_overflow_permitted() != permitted {
            state.manifest.set_overflow_permitted(permitted);
            if let Err(e) = state.manifest.persist(&self.cache_dir).await {
                state.manifest.set_overflow_permitted(!permitted);
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn is_overflow_permitted(&self) -> Result<bool> {
        let state = self.lock_open().await?;
        Ok(state.manifest.is_overflow_permitted())
    }

    /// Every cached object, oldest first
    pub async fn entries(&self) -> Result<Vec<StoredObject>> {
        let state = self.lock_open().await?;
        let mut objects = Vec::with_capacity(state.manifest.len());
        for (name, written_at) in state.manifest.oldest_first() {
            let path = self.data_dir.join(&name);
            let len = fs::metadata(&path).await?.len();
            let footprint = self.accountant.footprint_of(&path).await?;
            objects.push(StoredObject {
                name,
                path,
                len,
                footprint,
                written_at,
            });
        }
        Ok(objects)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let state = self.lock_open().await?;
        let used = self.used_bytes(&state.manifest, None).await?;
        Ok(CacheStats {
            entries: state.manifest.len(),
            used_bytes: used,
            free_bytes: SizeAccountant::free_bytes(self.config.ceiling, used),
            ceiling: self.config.ceiling,
            evictions: state.evictions,
        })
    }

    pub fn ceiling(&self) -> u64 {
        self.config.ceiling
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        Manifest::path_in(&self.cache_dir)
    }

    /// Total footprint of all manifest entries except `excluded`
    async fn used_bytes(&self, manifest: &Manifest, excluded: Option<&str>) -> Result<u64> {
        let mut used: u64 = 0;
        for name in manifest.names().filter(|&n| Some(n) != excluded) {
            let footprint = self.accountant.footprint_of(&self.data_dir.join(name)).await?;
            used = used.saturating_add(footprint);
        }
        Ok(used)
    }

    /// Evict oldest entries (never `protected`) until `required` bytes fit.
    /// The manifest is persisted if anything was evicted, even on error.
    async fn evict_for(
        &self,
        state: &mut StoreState,
        required: u64,
        protected: Option<&str>,
    ) -> Result<Eviction> {
        let mut evicted = Vec::new();
        let free = self
            .evict_loop(state, required, protected, &mut evicted)
            .await;

        let persisted = if evicted.is_empty() {
            Ok(())
        } else {
            state.manifest.persist(&self.cache_dir).await
        };

        let free = free?;
        persisted?;
        Ok(Eviction { evicted, free })
    }

    async fn evict_loop(
        &self,
        state: &mut StoreState,
        required: u64,
        protected: Option<&str>,
        evicted: &mut Vec<String>,
    ) -> Result<u64> {
        loop {
            // Footprints are re-measured after every removal
            let used = self.used_bytes(&state.manifest, protected).await?;
            let free = SizeAccountant::free_bytes(self.config.ceiling, used);
            if required <= free {
                return Ok(free);
            }

            let Some((name, written_at)) = state.manifest.oldest_except(protected) else {
                return Ok(free);
            };

            remove_if_present(&self.data_dir.join(&name)).await?;
            state.manifest.remove(&name);
            state.evictions += 1;
            debug!(name = %name, written_at, required, free, "Evicted data file");
            evicted.push(name);
        }
    }
}

/// Reject names that would escape the data directory or collide with
/// temporary files
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with(TEMP_PREFIX)
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(CacheError::InvalidName(name.to_string()));
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Delete a manifest scratch file left by an interrupted persist
async fn remove_stale_manifest_temp(cache_dir: &Path) -> Result<()> {
    let tmp = Manifest::temp_path_in(cache_dir);
    match fs::symlink_metadata(&tmp).await {
        Ok(metadata) if metadata.is_file() => {
            warn!(path = %tmp.display(), "Deleting leftover manifest temp file");
            remove_if_present(&tmp).await?;
        }
        Ok(_) => {
            warn!(path = %tmp.display(), "Ignoring unexpected entry at manifest temp path");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Make the manifest and the data directory agree. Returns whether the
/// manifest changed.
async fn reconcile(data_dir: &Path, manifest: &mut Manifest) -> Result<bool> {
    let mut dangling = Vec::new();
    for name in manifest.names() {
        if validate_name(name).is_err() {
            dangling.push(name.to_string());
            continue;
        }
        match fs::metadata(data_dir.join(name)).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => dangling.push(name.to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => dangling.push(name.to_string()),
            Err(e) => return Err(e.into()),
        }
    }
    for name in &dangling {
        warn!(name = %name, "Dropping manifest entry with no data file");
        manifest.remove(name);
    }

    let mut dir = fs::read_dir(data_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        let file_name = entry.file_name();
        let known = file_name
            .to_str()
            .is_some_and(|name| manifest.contains(name));
        if known {
            continue;
        }
        if entry.file_type().await?.is_file() {
            warn!(path = %entry.path().display(), "Deleting orphaned data file");
            remove_if_present(&entry.path()).await?;
        } else {
            warn!(path = %entry.path().display(), "Ignoring unexpected entry in data directory");
        }
    }

    Ok(!dangling.is_empty())
}
