use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{CachedEntry, RequestKey, StoredResponse};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache name: {0:?}")]
    InvalidName(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// One named cache store: request key to stored response.
///
/// `put` must be atomic per key. Concurrent puts for the same key are allowed
/// and the last one wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>, CacheError>;

    async fn put(&self, key: RequestKey, response: StoredResponse) -> Result<(), CacheError>;

    /// Returns true if an entry was removed.
    async fn delete(&self, key: &RequestKey) -> Result<bool, CacheError>;

    async fn keys(&self) -> Result<Vec<RequestKey>, CacheError>;
}

/// Provider of named cache stores.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    type Store: CacheStore;

    /// Open the store called `name`, creating it if absent.
    async fn open(&self, name: &str) -> Result<Self::Store, CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Returns true if a store was removed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of all stores, in creation order where the provider knows it.
    async fn names(&self) -> Result<Vec<String>, CacheError>;
}

/// Cache names double as directory names, so they are kept path-safe.
pub(crate) fn validate_name(name: &str) -> Result<(), CacheError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(CacheError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ============================================================================
// In-memory provider
// ============================================================================

/// Handle to an in-memory store. Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<RequestKey, CachedEntry>>>,
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: RequestKey, response: StoredResponse) -> Result<(), CacheError> {
        let entry = CachedEntry::new(key.clone(), response);
        self.entries.write().await.insert(key, entry);
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<RequestKey>, CacheError> {
        let mut keys: Vec<RequestKey> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-memory cache storage, for tests and hosts without a cache directory.
/// Clone is cheap and clones see the same stores.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    caches: Arc<RwLock<Vec<(String, MemoryStore)>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    type Store = MemoryStore;

    async fn open(&self, name: &str) -> Result<MemoryStore, CacheError> {
        validate_name(name)?;
        let mut caches = self.caches.write().await;
        if let Some((_, store)) = caches.iter().find(|(n, _)| n == name) {
            return Ok(store.clone());
        }
        let store = MemoryStore::default();
        caches.push((name.to_string(), store.clone()));
        Ok(store)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.iter().any(|(n, _)| n == name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|(n, _)| n != name);
        Ok(caches.len() != before)
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().await.iter().map(|(n, _)| n.clone()).collect())
    }
}
