//! Cache file storage with XDG path support.
//!
//! This module persists a cache snapshot ([`CacheData`]) as JSON at an
//! XDG-compliant location, `~/.cache/pimsync/cache.json` on Unix. Writes
//! go through a temp file plus rename so a crash mid-write never leaves a
//! torn cache file; together with the snapshot model this gives mutating
//! operations their all-or-nothing behavior against the backing store.

use std::fs;
use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;
use thiserror::Error;
use tracing::debug;

use crate::CacheData;

/// Default cache filename.
const CACHE_FILENAME: &str = "cache.json";

/// Application qualifier (for XDG paths).
const QUALIFIER: &str = "";

/// Application organization (for XDG paths).
const ORGANIZATION: &str = "";

/// Application name (for XDG paths).
const APPLICATION: &str = "pimsync";

/// Errors that can occur during cache storage operations.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    /// Failed to determine XDG cache directory.
    #[error("failed to determine cache directory: no valid home directory found")]
    NoCacheDir,

    /// I/O error during file read.
    #[error("failed to read cache file '{path}': {source}")]
    ReadError {
        /// The path that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// I/O error during file write.
    #[error("failed to write cache file '{path}': {source}")]
    WriteError {
        /// The path that failed to write.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// I/O error during directory creation.
    #[error("failed to create cache directory '{path}': {source}")]
    CreateDirError {
        /// The directory path that failed to create.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// I/O error during file delete.
    #[error("failed to delete cache file '{path}': {source}")]
    DeleteError {
        /// The path that failed to delete.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cache store operations.
pub type Result<T> = std::result::Result<T, CacheStoreError>;

/// Persistent storage for cache snapshots.
///
/// # Example
///
/// ```no_run
/// use pim_cache_rs::{CacheStore, ItemCache};
///
/// let store = CacheStore::new()?;
///
/// // Load the persisted snapshot, or start empty
/// let cache = ItemCache::from_data(store.load_or_default()?).unwrap();
///
/// // ... mutate the cache ...
///
/// store.save(&cache.snapshot())?;
/// # Ok::<(), pim_cache_rs::CacheStoreError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Path to the cache file.
    path: PathBuf,
}

impl CacheStore {
    /// Creates a new `CacheStore` with the default XDG cache path.
    ///
    /// # Errors
    ///
    /// Returns `CacheStoreError::NoCacheDir` if the home directory cannot
    /// be determined.
    pub fn new() -> Result<Self> {
        let path = Self::default_path()?;
        Ok(Self { path })
    }

    /// Creates a new `CacheStore` with a custom path.
    ///
    /// This is primarily useful for testing.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Returns the default XDG cache path for the cache file.
    ///
    /// On Unix: `~/.cache/pimsync/cache.json`
    /// On macOS: `~/Library/Caches/pimsync/cache.json`
    ///
    /// # Errors
    ///
    /// Returns `CacheStoreError::NoCacheDir` if the home directory cannot
    /// be determined.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
            .ok_or(CacheStoreError::NoCacheDir)?;

        let cache_dir = project_dirs.cache_dir();
        Ok(cache_dir.join(CACHE_FILENAME))
    }

    /// Returns the path to the cache file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Loads a cache snapshot from disk.
    ///
    /// # Errors
    ///
    /// - Returns `CacheStoreError::ReadError` if the file cannot be read
    ///   (including `ErrorKind::NotFound` when it does not exist; use
    ///   [`load_or_default`](Self::load_or_default) to start empty).
    /// - Returns `CacheStoreError::Json` if the file contains invalid JSON.
    pub fn load(&self) -> Result<CacheData> {
        let contents = fs::read_to_string(&self.path).map_err(|e| CacheStoreError::ReadError {
            path: self.path.clone(),
            source: e,
        })?;
        let data: CacheData = serde_json::from_str(&contents)?;
        Ok(data)
    }

    /// Loads a cache snapshot, returning an empty one if the file doesn't
    /// exist.
    ///
    /// # Errors
    ///
    /// - Returns `CacheStoreError::ReadError` for I/O errors other than
    ///   "file not found".
    /// - Returns `CacheStoreError::Json` if the file contains invalid JSON.
    pub fn load_or_default(&self) -> Result<CacheData> {
        match self.load() {
            Ok(data) => Ok(data),
            Err(CacheStoreError::ReadError { ref source, .. })
                if source.kind() == io::ErrorKind::NotFound =>
            {
                Ok(CacheData::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Saves a cache snapshot to disk atomically.
    ///
    /// Creates the parent directory if it doesn't exist. The snapshot is
    /// written as pretty-printed JSON to a temp file and renamed into
    /// place, so a crash mid-write cannot corrupt the previous file.
    ///
    /// # Errors
    ///
    /// - Returns `CacheStoreError::CreateDirError` if the directory cannot
    ///   be created.
    /// - Returns `CacheStoreError::WriteError` if the file cannot be written.
    /// - Returns `CacheStoreError::Json` if serialization fails.
    pub fn save(&self, data: &CacheData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheStoreError::CreateDirError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let json = serde_json::to_string_pretty(data)?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json).map_err(|e| CacheStoreError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| CacheStoreError::WriteError {
            path: self.path.clone(),
            source: e,
        })?;

        debug!(path = %self.path.display(), rows = data.rows.len(), "saved cache");
        Ok(())
    }

    /// Returns true if the cache file exists on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Deletes the cache file from disk.
    ///
    /// # Errors
    ///
    /// Returns `CacheStoreError::DeleteError` if the file cannot be
    /// deleted. Does not return an error if the file doesn't exist.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheStoreError::DeleteError {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OfflineState, RowData};

    #[test]
    fn test_default_path_contains_application_name() {
        let path = CacheStore::default_path().expect("should get default path");
        let path_str = path.to_string_lossy();

        assert!(
            path_str.contains("pimsync"),
            "path should contain 'pimsync': {}",
            path_str
        );
        assert!(path.is_absolute(), "path should be absolute: {:?}", path);
    }

    #[test]
    fn test_store_with_custom_path() {
        let custom_path = PathBuf::from("/tmp/test/cache.json");
        let store = CacheStore::with_path(custom_path.clone());

        assert_eq!(store.path(), &custom_path);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        use tempfile::tempdir;

        let temp_dir = tempdir().expect("failed to create temp dir");
        let path = temp_dir.path().join("cache.json");
        let store = CacheStore::with_path(path);

        let mut data = CacheData::new();
        data.version = 2;
        data.revision = Some("rev-9".to_string());
        data.rows.push(RowData {
            uid: "a".to_string(),
            recurrence_id: None,
            payload: "{\"uid\":\"a\"}".to_string(),
            extra: None,
            custom_flags: 0,
            offline_state: OfflineState::Synced,
        });

        store.save(&data).expect("save failed");
        let loaded = store.load().expect("load failed");
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        use tempfile::tempdir;

        let temp_dir = tempdir().expect("failed to create temp dir");
        let path = temp_dir.path().join("cache.json");
        let store = CacheStore::with_path(path.clone());

        store.save(&CacheData::new()).expect("save failed");

        let temp_path = path.with_extension("tmp");
        assert!(!temp_path.exists(), "temp file should be cleaned up");
        assert!(path.exists(), "cache file should exist");
    }

    #[test]
    fn test_save_creates_parent_directories() {
        use tempfile::tempdir;

        let temp_dir = tempdir().expect("failed to create temp dir");
        let path = temp_dir
            .path()
            .join("nested")
            .join("deeper")
            .join("cache.json");
        let store = CacheStore::with_path(path.clone());

        store.save(&CacheData::new()).expect("save failed");
        assert!(path.exists());
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let store = CacheStore::with_path(PathBuf::from("/nonexistent/path/cache.json"));

        match store.load() {
            Err(CacheStoreError::ReadError { source, path }) => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
                assert!(path.to_string_lossy().contains("nonexistent"));
            }
            other => panic!("expected ReadError, got {other:?}"),
        }
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let store = CacheStore::with_path(PathBuf::from("/nonexistent/path/cache.json"));

        let data = store.load_or_default().expect("should fall back to default");
        assert_eq!(data, CacheData::new());
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        use tempfile::tempdir;

        let temp_dir = tempdir().expect("failed to create temp dir");
        let path = temp_dir.path().join("cache.json");
        fs::write(&path, "{ not json").expect("failed to write fixture");

        let store = CacheStore::with_path(path);
        assert!(matches!(store.load(), Err(CacheStoreError::Json(_))));
    }

    #[test]
    fn test_delete_missing_file_is_ok() {
        let store = CacheStore::with_path(PathBuf::from("/nonexistent/path/cache.json"));
        assert!(store.delete().is_ok());
    }

    #[test]
    fn test_delete_removes_file() {
        use tempfile::tempdir;

        let temp_dir = tempdir().expect("failed to create temp dir");
        let path = temp_dir.path().join("cache.json");
        let store = CacheStore::with_path(path.clone());

        store.save(&CacheData::new()).expect("save failed");
        assert!(store.exists());

        store.delete().expect("delete failed");
        assert!(!store.exists());
    }

    #[test]
    fn test_error_message_format_read() {
        let error = CacheStoreError::ReadError {
            path: PathBuf::from("/home/user/.cache/pimsync/cache.json"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        };

        assert_eq!(
            error.to_string(),
            "failed to read cache file '/home/user/.cache/pimsync/cache.json': permission denied"
        );
    }
}
