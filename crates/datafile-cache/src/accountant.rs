//! Footprint and free-space accounting
//!
//! A stored object costs more than its logical length on some filesystems
//! (allocation rounding, attached attribute data). The overhead is supplied by
//! a [`MetadataOverhead`] implementation and is always measured fresh from the
//! file on disk.

use crate::error::Result;
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Extra bytes a file consumes beyond its logical length
pub trait MetadataOverhead: Send + Sync {
    /// Overhead of a file that already exists
    fn measured(&self, path: &Path, metadata: &Metadata) -> io::Result<u64>;

    /// Overhead expected for a file of `len` bytes that has not been written yet
    fn estimated(&self, len: u64) -> u64;
}

/// Logical length is the whole footprint
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverhead;

impl MetadataOverhead for NoOverhead {
    fn measured(&self, _path: &Path, _metadata: &Metadata) -> io::Result<u64> {
        Ok(0)
    }

    fn estimated(&self, _len: u64) -> u64 {
        0
    }
}

/// A constant number of bytes per file
#[derive(Debug, Clone, Copy)]
pub struct FixedOverhead(pub u64);

impl MetadataOverhead for FixedOverhead {
    fn measured(&self, _path: &Path, _metadata: &Metadata) -> io::Result<u64> {
        Ok(self.0)
    }

    fn estimated(&self, _len: u64) -> u64 {
        self.0
    }
}

/// Space actually allocated by the filesystem
///
/// On unix the measured overhead comes from the allocated block count; the
/// estimate rounds the length up to `block_size`.
#[derive(Debug, Clone, Copy)]
pub struct AllocatedBlocks {
    pub block_size: u64,
}

impl Default for AllocatedBlocks {
    fn default() -> Self {
        Self { block_size: 4096 }
    }
}

impl AllocatedBlocks {
    fn round_up_overhead(&self, len: u64) -> u64 {
        if self.block_size == 0 {
            return 0;
        }
        let rem = len % self.block_size;
        if rem == 0 {
            0
        } else {
            self.block_size - rem
        }
    }
}

impl MetadataOverhead for AllocatedBlocks {
    #[cfg(unix)]
    fn measured(&self, _path: &Path, metadata: &Metadata) -> io::Result<u64> {
        use std::os::unix::fs::MetadataExt;
        Ok(metadata
            .blocks()
            .saturating_mul(512)
            .saturating_sub(metadata.len()))
    }

    #[cfg(not(unix))]
    fn measured(&self, _path: &Path, metadata: &Metadata) -> io::Result<u64> {
        Ok(self.round_up_overhead(metadata.len()))
    }

    fn estimated(&self, len: u64) -> u64 {
        self.round_up_overhead(len)
    }
}

/// Bytes held in extended attributes attached to the file
///
/// Small attributes are stored out of band (in the inode on most Linux
/// filesystems) and never show up in the allocated block count. The measured
/// overhead is the sum of all attribute value lengths; `estimate` is charged
/// for files not yet written.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedAttributes {
    pub estimate: u64,
}

impl MetadataOverhead for ExtendedAttributes {
    #[cfg(unix)]
    fn measured(&self, path: &Path, _metadata: &Metadata) -> io::Result<u64> {
        if !xattr::SUPPORTED_PLATFORM {
            return Ok(0);
        }
        let mut total: u64 = 0;
        for attr in xattr::list(path)? {
            if let Some(value) = xattr::get(path, &attr)? {
                total = total.saturating_add(value.len() as u64);
            }
        }
        Ok(total)
    }

    #[cfg(not(unix))]
    fn measured(&self, _path: &Path, _metadata: &Metadata) -> io::Result<u64> {
        Ok(0)
    }

    fn estimated(&self, _len: u64) -> u64 {
        self.estimate
    }
}

/// Two overheads charged together, e.g. block rounding plus attributes
impl<A: MetadataOverhead, B: MetadataOverhead> MetadataOverhead for (A, B) {
    fn measured(&self, path: &Path, metadata: &Metadata) -> io::Result<u64> {
        Ok(self
            .0
            .measured(path, metadata)?
            .saturating_add(self.1.measured(path, metadata)?))
    }

    fn estimated(&self, len: u64) -> u64 {
        self.0.estimated(len).saturating_add(self.1.estimated(len))
    }
}

/// Computes footprints and remaining budget
#[derive(Clone)]
pub struct SizeAccountant {
    overhead: Arc<dyn MetadataOverhead>,
}

impl fmt::Debug for SizeAccountant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeAccountant").finish_non_exhaustive()
    }
}

impl Default for SizeAccountant {
    fn default() -> Self {
        Self::new(NoOverhead)
    }
}

impl SizeAccountant {
    pub fn new(overhead: impl MetadataOverhead + 'static) -> Self {
        Self {
            overhead: Arc::new(overhead),
        }
    }

    /// Logical length plus metadata overhead of the file at `path`
    pub async fn footprint_of(&self, path: &Path) -> Result<u64> {
        let metadata = tokio::fs::metadata(path).await?;
        let overhead = self.overhead.measured(path, &metadata)?;
        Ok(metadata.len().saturating_add(overhead))
    }

    /// Footprint a write of `len` bytes is expected to occupy
    pub fn estimated_footprint(&self, len: u64) -> u64 {
        len.saturating_add(self.overhead.estimated(len))
    }

    /// Headroom under `ceiling`; zero once `used` has overflowed it
    pub fn free_bytes(ceiling: u64, used: u64) -> u64 {
        ceiling.saturating_sub(used)
    }

    pub fn would_fit(ceiling: u64, used: u64, candidate: u64) -> bool {
        candidate <= Self::free_bytes(ceiling, used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_free_bytes_clamps_at_zero() {
        assert_eq!(SizeAccountant::free_bytes(100, 40), 60);
        assert_eq!(SizeAccountant::free_bytes(100, 100), 0);
        assert_eq!(SizeAccountant::free_bytes(100, 250), 0);
        assert_eq!(SizeAccountant::free_bytes(u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn test_would_fit() {
        assert!(SizeAccountant::would_fit(100, 40, 60));
        assert!(!SizeAccountant::would_fit(100, 40, 61));
        assert!(SizeAccountant::would_fit(100, 250, 0));
        assert!(!SizeAccountant::would_fit(100, 250, 1));
    }

    #[test]
    fn test_block_rounding_estimate() {
        let blocks = AllocatedBlocks { block_size: 4096 };
        assert_eq!(blocks.estimated(0), 0);
        assert_eq!(blocks.estimated(1), 4095);
        assert_eq!(blocks.estimated(4096), 0);
        assert_eq!(blocks.estimated(4097), 4095);

        let degenerate = AllocatedBlocks { block_size: 0 };
        assert_eq!(degenerate.estimated(17), 0);
    }

    #[test]
    fn test_estimated_footprint_includes_overhead() {
        let accountant = SizeAccountant::new(FixedOverhead(32));
        assert_eq!(accountant.estimated_footprint(100), 132);
        assert_eq!(SizeAccountant::default().estimated_footprint(100), 100);
    }

    #[tokio::test]
    async fn test_footprint_of_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, vec![7u8; 300]).unwrap();

        let plain = SizeAccountant::default();
        assert_eq!(plain.footprint_of(&path).await.unwrap(), 300);

        let fixed = SizeAccountant::new(FixedOverhead(10));
        assert_eq!(fixed.footprint_of(&path).await.unwrap(), 310);

        let allocated = SizeAccountant::new(AllocatedBlocks::default());
        assert!(allocated.footprint_of(&path).await.unwrap() >= 300);
    }

    #[test]
    fn test_paired_overheads_add_up() {
        let paired = (FixedOverhead(8), ExtendedAttributes { estimate: 100 });
        assert_eq!(paired.estimated(1), 108);

        let accountant =
            SizeAccountant::new((AllocatedBlocks { block_size: 16 }, FixedOverhead(1)));
        assert_eq!(accountant.estimated_footprint(10), 17);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extended_attributes_count_toward_footprint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged");
        std::fs::write(&path, vec![1u8; 64]).unwrap();

        let accountant = SizeAccountant::new(ExtendedAttributes::default());
        let before = accountant.footprint_of(&path).await.unwrap();
        assert!(before >= 64);

        let value = vec![b'x'; 200];
        if xattr::set(&path, "user.datafile_cache.test", &value).is_err() {
            // Filesystem without user attribute support
            return;
        }

        let after = accountant.footprint_of(&path).await.unwrap();
        assert_eq!(after, before + 200);
        assert_eq!(accountant.estimated_footprint(64), 64);
    }

    #[tokio::test]
    async fn test_footprint_of_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = SizeAccountant::default()
            .footprint_of(&dir.path().join("absent"))
            .await;
        assert!(matches!(result, Err(crate::CacheError::Io(_))));
    }
}
