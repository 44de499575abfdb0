//! Error types for the data file cache

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CacheError {
    /// A non-overwriting save targeted a name that is already cached
    AlreadyExists(String),
    /// Eviction could not free enough space and overflow is not permitted
    CacheFull { name: String, required: u64, free: u64 },
    /// The store has been closed
    Closed,
    /// The persisted manifest exists but does not have the expected shape
    CorruptManifest { path: PathBuf, reason: String },
    /// The cache or data directory could not be created
    DirectoryCreate { path: PathBuf, source: Box<std::io::Error> },
    Io(Box<std::io::Error>),
    /// The named object is not cached
    NotFound(String),
    /// The name cannot be used as a file name inside the data directory
    InvalidName(String),
    Config(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::AlreadyExists(name) => write!(f, "Already cached: {}", name),
            CacheError::CacheFull {
                name,
                required,
                free,
            } => write!(
                f,
                "Cache full: {} needs {} bytes, {} bytes free after eviction",
                name, required, free
            ),
            CacheError::Closed => write!(f, "Cache store is closed"),
            CacheError::CorruptManifest { path, reason } => {
                write!(f, "Corrupt manifest {}: {}", path.display(), reason)
            }
            CacheError::DirectoryCreate { path, source } => {
                write!(f, "Failed to create directory {}: {}", path.display(), source)
            }
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::NotFound(name) => write!(f, "Not cached: {}", name),
            CacheError::InvalidName(name) => write!(f, "Invalid object name: {:?}", name),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::DirectoryCreate { source, .. } => Some(source.as_ref()),
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_already_exists_display() {
        let err = CacheError::AlreadyExists("clip.wav".to_string());
        assert_eq!(format!("{}", err), "Already cached: clip.wav");
    }

    #[test]
    fn test_cache_full_display() {
        let err = CacheError::CacheFull {
            name: "big.bin".to_string(),
            required: 500,
            free: 100,
        };
        assert_eq!(
            format!("{}", err),
            "Cache full: big.bin needs 500 bytes, 100 bytes free after eviction"
        );
    }

    #[test]
    fn test_io_error_has_source() {
        let err: CacheError = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(format!("{}", err).contains("disk gone"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_directory_create_has_source() {
        let err = CacheError::DirectoryCreate {
            path: PathBuf::from("/nope"),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "denied",
            )),
        };
        assert!(format!("{}", err).contains("/nope"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_is_debug() {
        let err = CacheError::Closed;
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Closed"));
    }
}
