//! Durable cache storage on the local filesystem.
//!
//! Each named store is a directory under the storage root. Each entry is a
//! single `<digest>.entry` file: one line of JSON metadata, a newline, then
//! the raw body bytes. Entries are written to a temporary file and renamed
//! into place, so a reader sees either the old entry or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::models::{CachedEntry, RequestKey, StoredResponse};

use super::store::{validate_name, CacheError, CacheStorage, CacheStore};

const ENTRY_EXTENSION: &str = "entry";

/// Distinguishes temp files of concurrent writers within this process
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    url: String,
    stored_at: DateTime<Utc>,
}

impl EntryMeta {
    fn encode(entry: &CachedEntry) -> Result<Vec<u8>, CacheError> {
        let meta = EntryMeta {
            key: entry.key.clone(),
            status: entry.response.status,
            headers: entry.response.headers.clone(),
            url: entry.response.url.clone(),
            stored_at: entry.stored_at,
        };
        // Compact JSON escapes newlines inside strings, so the first raw
        // newline always terminates the metadata line.
        let mut bytes = serde_json::to_vec(&meta).map_err(|e| CacheError::Corrupt {
            key: entry.key.to_string(),
            reason: e.to_string(),
        })?;
        bytes.push(b'\n');
        bytes.extend_from_slice(&entry.response.body);
        Ok(bytes)
    }

    fn decode(path: &Path, bytes: Vec<u8>) -> Result<CachedEntry, CacheError> {
        let corrupt = |reason: String| CacheError::Corrupt {
            key: path.display().to_string(),
            reason,
        };

        let split = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("missing metadata line".to_string()))?;
        let meta: EntryMeta =
            serde_json::from_slice(&bytes[..split]).map_err(|e| corrupt(e.to_string()))?;
        let body = bytes[split + 1..].to_vec();

        Ok(CachedEntry {
            key: meta.key,
            response: StoredResponse {
                status: meta.status,
                headers: meta.headers,
                body,
                url: meta.url,
            },
            stored_at: meta.stored_at,
        })
    }
}

/// A named store backed by one directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.digest(), ENTRY_EXTENSION))
    }

    fn tmp_path(&self, key: &RequestKey) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".{}.{}.{}.tmp", key.digest(), std::process::id(), n))
    }

    async fn read_entry(path: &Path) -> Result<Option<CachedEntry>, CacheError> {
        match fs::read(path).await {
            Ok(bytes) => EntryMeta::decode(path, bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>, CacheError> {
        let entry = Self::read_entry(&self.entry_path(key)).await?;
        // Digest collisions are not expected, but never serve another URL's body
        Ok(entry.filter(|e| &e.key == key))
    }

    async fn put(&self, key: RequestKey, response: StoredResponse) -> Result<(), CacheError> {
        let path = self.entry_path(&key);
        let tmp = self.tmp_path(&key);
        let bytes = EntryMeta::encode(&CachedEntry::new(key, response))?;

        if let Err(e) = fs::write(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote cache entry");
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, CacheError> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<RequestKey>, CacheError> {
        let mut keys = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            // Store deleted out from under this handle
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(entry) = Self::read_entry(&path).await? {
                keys.push(entry.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Cache storage rooted at a directory, typically `<cache_dir>/kaibora/caches`.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    type Store = DiskStore;

    async fn open(&self, name: &str) -> Result<DiskStore, CacheError> {
        let dir = self.store_dir(name)?;
        fs::create_dir_all(&dir).await?;
        Ok(DiskStore { dir })
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.store_dir(name)?;
        match fs::metadata(&dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.store_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Sorted by name; the filesystem does not keep creation order.
    async fn names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            if item.file_type().await?.is_dir() {
                if let Some(name) = item.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
