//! Write-temp-then-rename file replacement

use std::io;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Replace `dest` with `bytes` so readers see either the old or the new
/// content, never a partial file. `tmp` must be on the same filesystem.
pub(crate) async fn write_atomically(tmp: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let result = write_then_rename(tmp, dest, bytes).await;
    if result.is_err() {
        let _ = fs::remove_file(tmp).await;
    }
    result
}

async fn write_then_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    {
        let mut file = File::create(tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
    }

    fs::rename(tmp, dest).await?;

    if let Some(parent) = dest.parent() {
        sync_dir(parent).await;
    }
    Ok(())
}

/// Flush directory entries so the rename survives power loss (best effort)
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir).await {
        let _ = handle.sync_all().await;
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("target");
        let tmp = dir.path().join(".target.tmp");
        std::fs::write(&dest, b"old").unwrap();

        write_atomically(&tmp, &dest, b"new contents").await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new contents");
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn test_failure_leaves_destination_untouched() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing-dir").join("target");
        let tmp = dir.path().join(".target.tmp");

        let result = write_atomically(&tmp, &dest, b"data").await;

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!tmp.exists());
    }
}
