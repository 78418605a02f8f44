//! [`CacheStore`] implementations.
//!
//! [`MemoryStore`] keeps records for the lifetime of the process.
//! [`FileStore`] keeps one JSON file per key in a namespace directory so
//! pools survive restarts. Both accept an optional byte quota and report
//! [`StoreError::QuotaExceeded`] when a write would cross it.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::{cache::CacheStore, error::StoreError};

const RECORD_EXTENSION: &str = "json";

/// In-process store backed by a `HashMap`.
///
/// Usage is counted as the byte length of keys plus values.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes beyond `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: Mutex::default(),
            quota: Some(bytes),
        }
    }

    /// Bytes currently used by keys and values.
    pub fn usage(&self) -> usize {
        self.entries()
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries();
        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, stored)| existing.len() + stored.len())
                .sum();
            if others + key.len() + value.len() > quota {
                return Err(StoreError::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries().keys().cloned().collect())
    }
}

/// Directory-backed store: one file per key, named by the URL-safe base64
/// encoding of the key.
///
/// # Example
///
/// ```no_run
/// use filmstrip::{CacheStore, FileStore, StoreError};
///
/// # async fn example() -> Result<(), StoreError> {
/// let store = FileStore::new("/tmp/filmstrip-cache").with_quota(5 * 1024 * 1024);
/// store.set("greeting", "{\"timestamp\":0}").await?;
/// assert!(store.get("greeting").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    quota: Option<u64>,
}

impl FileStore {
    /// Use `root` as the namespace directory. It is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota: None,
        }
    }

    /// Reject writes that would grow the directory beyond `bytes`.
    #[must_use]
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// The namespace directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Total size of all record files in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the directory cannot be read.
    pub async fn usage(&self) -> Result<u64, StoreError> {
        self.usage_excluding(None).await
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{RECORD_EXTENSION}", URL_SAFE_NO_PAD.encode(key)))
    }

    async fn usage_excluding(&self, excluded: Option<&Path>) -> Result<u64, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error.into()),
        };
        let mut total = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if excluded == Some(path.as_path()) || !is_record_file(&path) {
                continue;
            }
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }
}

fn is_record_file(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == RECORD_EXTENSION)
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(quota) = self.quota {
            let others = self.usage_excluding(Some(&path)).await?;
            if others + value.len() as u64 > quota {
                return Err(StoreError::QuotaExceeded);
            }
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, value).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_record_file(&path) {
                continue;
            }
            let decoded = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| URL_SAFE_NO_PAD.decode(stem).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match decoded {
                Some(key) => keys.push(key),
                None => log::debug!("Skipping foreign file in cache directory: {}", path.display()),
            }
        }
        Ok(keys)
    }
}
