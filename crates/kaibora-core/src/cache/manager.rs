use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{FetchError, Fetcher};
use crate::models::{AssetRequest, CachedEntry, RequestKey, StoredResponse};

use super::store::{CacheError, CacheStorage, CacheStore};

/// Current cache generation. Bumping it makes the next activation drop the
/// previous generation's store.
pub const CACHE_NAME: &str = "kaibora-cache-v1";

/// Requests whose URL contains this go straight to the network.
pub const API_PATTERN: &str = "/api/";

/// Where the application shell is served from.
pub const DEFAULT_ORIGIN: &str = "https://guia-kaibora.netlify.app/";

/// Everything the application shell needs to work offline.
pub const BOOTSTRAP_ASSETS: &[&str] = &[
    "/",
    "login.html",
    "registrar.html",
    "login.css",
    "kaibora.html",
    "kaibora.css",
    "mapa_3d.xhtml",
    "static/gm.css",
    "static/x3dom.js",
    "static/x3dom.css",
    "static/icon.png",
];

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub cache_name: String,
    pub origin: Url,
    pub bootstrap_assets: Vec<String>,
    pub api_pattern: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_name: CACHE_NAME.to_string(),
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            bootstrap_assets: BOOTSTRAP_ASSETS.iter().map(|s| s.to_string()).collect(),
            api_pattern: API_PATTERN.to_string(),
        }
    }
}

impl CacheSettings {
    /// Resolve the bootstrap list against the origin, in list order.
    pub fn bootstrap_requests(&self) -> Result<Vec<AssetRequest>, InstallError> {
        let mut seen = HashSet::new();
        let mut requests = Vec::with_capacity(self.bootstrap_assets.len());
        for path in &self.bootstrap_assets {
            let request = AssetRequest::resolve(&self.origin, path).map_err(|source| {
                InstallError::InvalidAsset {
                    path: path.clone(),
                    source,
                }
            })?;
            if !seen.insert(request.key()) {
                return Err(InstallError::DuplicateAsset(request.url.to_string()));
            }
            requests.push(request);
        }
        Ok(requests)
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Invalid bootstrap asset {path:?}: {source}")]
    InvalidAsset {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Bootstrap asset listed twice: {0}")]
    DuplicateAsset(String),

    #[error("Failed to fetch bootstrap asset {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub cache_name: String,
    /// Keys written, in bootstrap list order
    pub stored: Vec<RequestKey>,
}

/// Where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
    Passthrough,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Network => "network",
            Source::Passthrough => "passthrough",
        }
    }
}

/// Outcome of intercepting one request.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Served from the named store, no network activity
    Cached(StoredResponse),
    /// Cache miss answered by the network
    Fetched(StoredResponse),
    /// API request, or manager not yet active; the store was not touched
    Passthrough(StoredResponse),
    /// Cache miss and the network failed; resolves with nothing
    Unavailable,
}

impl Resolution {
    pub fn source(&self) -> Option<Source> {
        match self {
            Resolution::Cached(_) => Some(Source::Cache),
            Resolution::Fetched(_) => Some(Source::Network),
            Resolution::Passthrough(_) => Some(Source::Passthrough),
            Resolution::Unavailable => None,
        }
    }

    pub fn response(&self) -> Option<&StoredResponse> {
        match self {
            Resolution::Cached(r) | Resolution::Fetched(r) | Resolution::Passthrough(r) => Some(r),
            Resolution::Unavailable => None,
        }
    }

    pub fn into_response(self) -> Option<StoredResponse> {
        match self {
            Resolution::Cached(r) | Resolution::Fetched(r) | Resolution::Passthrough(r) => Some(r),
            Resolution::Unavailable => None,
        }
    }
}

/// Cache-first asset server with a service worker lifecycle.
///
/// `install` populates the bootstrap assets, `activate` drops stale cache
/// generations and starts interception, `handle` serves one request.
pub struct OfflineCacheManager<S, F> {
    storage: S,
    fetcher: F,
    settings: CacheSettings,
    active: AtomicBool,
    installed: AtomicBool,
}

impl<S: CacheStorage, F: Fetcher> OfflineCacheManager<S, F> {
    pub fn new(storage: S, fetcher: F, settings: CacheSettings) -> Self {
        Self {
            storage,
            fetcher,
            settings,
            active: AtomicBool::new(false),
            installed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Fetch every bootstrap asset and store them all, or store nothing.
    ///
    /// Any network failure or non-2xx status fails the install.
    pub async fn install(&self) -> Result<InstallReport, InstallError> {
        let name = &self.settings.cache_name;
        let store = self.storage.open(name).await?;
        info!(cache = %name, assets = self.settings.bootstrap_assets.len(), "Opened cache, storing bootstrap assets");

        let requests = self.settings.bootstrap_requests()?;
        let fetches = requests.iter().map(|request| async move {
            let fetch_error = |source| InstallError::Fetch {
                url: request.url.to_string(),
                source,
            };
            let response = self.fetcher.fetch(request).await.map_err(fetch_error)?;
            if !response.is_success() {
                let body = String::from_utf8_lossy(&response.body);
                return Err(fetch_error(FetchError::from_status(response.status, &body)));
            }
            Ok::<_, InstallError>((request.key(), response))
        });
        let fetched = try_join_all(fetches).await?;

        let mut stored = Vec::with_capacity(fetched.len());
        for (key, response) in fetched {
            store.put(key.clone(), response).await?;
            stored.push(key);
        }

        self.installed.store(true, Ordering::Release);
        info!(cache = %name, stored = stored.len(), "Install complete");
        Ok(InstallReport {
            cache_name: name.clone(),
            stored,
        })
    }

    /// Delete every store but the current generation and start intercepting.
    /// Returns the names of the deleted stores.
    ///
    /// Stale stores are kept while the current generation holds nothing,
    /// so an uninstalled generation never costs the previous offline shell.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut removed = Vec::new();
        if !self.current_generation_installed().await? {
            warn!(
                cache = %self.settings.cache_name,
                "Current cache not installed, keeping older caches"
            );
            self.resume();
            return Ok(removed);
        }

        for name in self.storage.names().await? {
            if name == self.settings.cache_name {
                continue;
            }
            if self.storage.delete(&name).await? {
                info!(cache = %name, "Deleted stale cache");
                removed.push(name);
            }
        }

        self.resume();
        Ok(removed)
    }

    /// Start intercepting without touching any store, for hosts reopening a
    /// cache an earlier run installed.
    pub fn resume(&self) {
        self.active.store(true, Ordering::Release);
        info!(cache = %self.settings.cache_name, "Activated");
    }

    async fn current_generation_installed(&self) -> Result<bool, CacheError> {
        if self.installed.load(Ordering::Acquire) {
            return Ok(true);
        }
        let name = &self.settings.cache_name;
        if !self.storage.has(name).await? {
            return Ok(false);
        }
        let store = self.storage.open(name).await?;
        Ok(!store.keys().await?.is_empty())
    }

    /// Serve one intercepted request.
    ///
    /// Only API (and pre-activation) requests can return an error; asset
    /// requests always resolve, with `Resolution::Unavailable` when neither
    /// the cache nor the network can answer.
    pub async fn handle(&self, request: AssetRequest) -> Result<Resolution, FetchError> {
        if !self.is_active() {
            return self.fetcher.fetch(&request).await.map(Resolution::Passthrough);
        }

        if request.is_api(&self.settings.api_pattern) {
            debug!(method = %request.method, url = %request.url, "API request, bypassing cache");
            return self.fetcher.fetch(&request).await.map(Resolution::Passthrough);
        }

        Ok(self.cache_first(request).await)
    }

    async fn cache_first(&self, request: AssetRequest) -> Resolution {
        let key = request.key();

        match self.lookup(&key).await {
            Ok(Some(entry)) => {
                debug!(%key, "Cache hit");
                return Resolution::Cached(entry.response);
            }
            Ok(None) => debug!(%key, "Cache miss"),
            Err(e) => {
                warn!(%key, error = %e, "Cache lookup failed");
                return Resolution::Unavailable;
            }
        }

        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(%key, error = %e, "Network unavailable on cache miss");
                return Resolution::Unavailable;
            }
        };

        if key.method.is_cacheable() && response.is_success() {
            // The page gets one copy, the store the other
            if let Err(e) = self.store_response(key.clone(), response.clone()).await {
                warn!(%key, error = %e, "Failed to cache network response");
            }
        }

        Resolution::Fetched(response)
    }

    async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>, CacheError> {
        if !key.method.is_cacheable() {
            return Ok(None);
        }
        let store = self.storage.open(&self.settings.cache_name).await?;
        store.lookup(key).await
    }

    async fn store_response(&self, key: RequestKey, response: StoredResponse) -> Result<(), CacheError> {
        let store = self.storage.open(&self.settings.cache_name).await?;
        store.put(key, response).await
    }
}

impl<S, F> OfflineCacheManager<S, F>
where
    S: CacheStorage + 'static,
    S::Store: 'static,
    F: Fetcher + 'static,
{
    /// Run `handle` as its own task.
    ///
    /// The returned handle is the pending signal for the host: the fetch and
    /// the cache write keep running even if the caller stops waiting.
    pub fn dispatch(self: &Arc<Self>, request: AssetRequest) -> JoinHandle<Result<Resolution, FetchError>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.handle(request).await })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{MemoryStorage, MemoryStore};
    use crate::models::Method;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Serves canned responses by URL and records every fetch.
    #[derive(Default)]
    struct FakeFetcher {
        responses: Mutex<HashMap<String, StoredResponse>>,
        offline: AtomicBool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn with_bootstrap(settings: &CacheSettings) -> Self {
            let fetcher = Self::default();
            for request in settings.bootstrap_requests().unwrap() {
                let url = request.url.to_string();
                fetcher.serve(&url, StoredResponse::new(200, format!("asset {}", url)));
            }
            fetcher
        }

        fn serve(&self, url: &str, response: StoredResponse) {
            self.responses.lock().unwrap().insert(url.to_string(), response);
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, request: &AssetRequest) -> Result<StoredResponse, FetchError> {
            let url = request.url.to_string();
            self.calls.lock().unwrap().push(url.clone());
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::Unreachable(url));
            }
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(&url)
                .cloned()
                .unwrap_or_else(|| StoredResponse::new(404, "not found")))
        }
    }

    /// Counts how often the manager touches the storage.
    #[derive(Clone, Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        opens: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CacheStorage for CountingStorage {
        type Store = MemoryStore;

        async fn open(&self, name: &str) -> Result<MemoryStore, CacheError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open(name).await
        }

        async fn has(&self, name: &str) -> Result<bool, CacheError> {
            self.inner.has(name).await
        }

        async fn delete(&self, name: &str) -> Result<bool, CacheError> {
            self.inner.delete(name).await
        }

        async fn names(&self) -> Result<Vec<String>, CacheError> {
            self.inner.names().await
        }
    }

    type TestManager = OfflineCacheManager<CountingStorage, Arc<FakeFetcher>>;

    fn setup() -> (TestManager, CountingStorage, Arc<FakeFetcher>) {
        let settings = CacheSettings::default();
        let fetcher = Arc::new(FakeFetcher::with_bootstrap(&settings));
        let storage = CountingStorage::default();
        let manager = OfflineCacheManager::new(storage.clone(), Arc::clone(&fetcher), settings);
        (manager, storage, fetcher)
    }

    async fn installed() -> (TestManager, CountingStorage, Arc<FakeFetcher>) {
        let (manager, storage, fetcher) = setup();
        manager.install().await.unwrap();
        manager.activate().await.unwrap();
        (manager, storage, fetcher)
    }

    fn request(path: &str) -> AssetRequest {
        AssetRequest::resolve(&Url::parse(DEFAULT_ORIGIN).unwrap(), path).unwrap()
    }

    #[tokio::test]
    async fn test_install_stores_every_bootstrap_asset() {
        let (manager, storage, fetcher) = setup();
        let report = manager.install().await.unwrap();

        assert_eq!(report.cache_name, "kaibora-cache-v1");
        assert_eq!(report.stored.len(), 11);
        assert_eq!(fetcher.call_count(), 11);

        let store = storage.inner.open("kaibora-cache-v1").await.unwrap();
        for path in BOOTSTRAP_ASSETS {
            let entry = store.lookup(&request(path).key()).await.unwrap();
            assert!(entry.is_some(), "missing bootstrap asset {}", path);
        }
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let (manager, storage, fetcher) = setup();
        fetcher.serve(
            request("static/x3dom.js").url.as_str(),
            StoredResponse::new(503, "maintenance"),
        );

        let err = manager.install().await.unwrap_err();
        match err {
            InstallError::Fetch { url, source } => {
                assert!(url.ends_with("static/x3dom.js"));
                assert!(matches!(source, FetchError::ServerError(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        let store = storage.inner.open("kaibora-cache-v1").await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_fails_offline() {
        let (manager, _storage, fetcher) = setup();
        fetcher.set_offline(true);
        let err = manager.install().await.unwrap_err();
        assert!(matches!(
            err,
            InstallError::Fetch {
                source: FetchError::Unreachable(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_install_rejects_duplicate_assets() {
        let mut settings = CacheSettings::default();
        settings.bootstrap_assets = vec!["login.html".to_string(), "/login.html".to_string()];
        let manager = OfflineCacheManager::new(
            MemoryStorage::new(),
            Arc::new(FakeFetcher::default()),
            settings,
        );
        assert!(matches!(
            manager.install().await.unwrap_err(),
            InstallError::DuplicateAsset(_)
        ));
    }

    #[tokio::test]
    async fn test_cached_asset_served_without_network() {
        let (manager, _storage, fetcher) = installed().await;
        let before = fetcher.call_count();

        let resolution = manager.handle(request("static/icon.png")).await.unwrap();
        assert_eq!(resolution.source(), Some(Source::Cache));
        assert_eq!(fetcher.call_count(), before);
    }

    #[tokio::test]
    async fn test_cached_asset_is_idempotent() {
        let (manager, _storage, _fetcher) = installed().await;

        let first = manager.handle(request("kaibora.css")).await.unwrap().into_response().unwrap();
        let second = manager.handle(request("kaibora.css")).await.unwrap().into_response().unwrap();
        assert_eq!(first.body, second.body);
    }

    #[tokio::test]
    async fn test_api_request_bypasses_cache() {
        let (manager, storage, fetcher) = installed().await;
        let api = request("/api/registrar");
        fetcher.serve(api.url.as_str(), StoredResponse::new(201, "{}"));

        // Even a stored entry for the same key is ignored
        let store = storage.inner.open("kaibora-cache-v1").await.unwrap();
        store.put(api.key(), StoredResponse::new(200, "stale")).await.unwrap();

        let opens_before = storage.opens.load(Ordering::SeqCst);
        for _ in 0..2 {
            let resolution = manager.handle(api.clone()).await.unwrap();
            assert_eq!(resolution.source(), Some(Source::Passthrough));
            assert_eq!(resolution.response().unwrap().status, 201);
        }
        assert_eq!(storage.opens.load(Ordering::SeqCst), opens_before);
        assert_eq!(
            fetcher.calls().iter().filter(|u| u.ends_with("/api/registrar")).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_api_failure_propagates() {
        let (manager, storage, fetcher) = installed().await;
        fetcher.set_offline(true);
        let opens_before = storage.opens.load(Ordering::SeqCst);

        let err = manager.handle(request("/api/tarefas")).await.unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)));
        assert_eq!(storage.opens.load(Ordering::SeqCst), opens_before);
    }

    #[tokio::test]
    async fn test_miss_fetches_then_hits() {
        let (manager, storage, fetcher) = installed().await;
        let extra = request("static/extra.js");
        fetcher.serve(extra.url.as_str(), StoredResponse::new(200, "console.log(1)"));
        let before = fetcher.call_count();

        let first = manager.handle(extra.clone()).await.unwrap();
        assert_eq!(first.source(), Some(Source::Network));
        assert_eq!(fetcher.call_count(), before + 1);

        let second = manager.handle(extra.clone()).await.unwrap();
        assert_eq!(second.source(), Some(Source::Cache));
        assert_eq!(fetcher.call_count(), before + 1);
        assert_eq!(first.response().unwrap().body, second.response().unwrap().body);

        let store = storage.inner.open("kaibora-cache-v1").await.unwrap();
        assert!(store.lookup(&extra.key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_miss_while_offline_resolves_unavailable() {
        let (manager, _storage, fetcher) = installed().await;
        fetcher.set_offline(true);

        let resolution = manager.handle(request("mapa_extra.xhtml")).await.unwrap();
        assert!(matches!(resolution, Resolution::Unavailable));
        assert!(resolution.into_response().is_none());

        // Bootstrap assets still work offline
        let shell = manager.handle(request("/")).await.unwrap();
        assert_eq!(shell.source(), Some(Source::Cache));
    }

    #[tokio::test]
    async fn test_error_status_is_returned_but_not_cached() {
        let (manager, storage, _fetcher) = installed().await;
        let missing = request("missing.html");

        let resolution = manager.handle(missing.clone()).await.unwrap();
        assert_eq!(resolution.source(), Some(Source::Network));
        assert_eq!(resolution.response().unwrap().status, 404);

        let store = storage.inner.open("kaibora-cache-v1").await.unwrap();
        assert!(store.lookup(&missing.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_get_asset_is_not_cached() {
        let (manager, storage, fetcher) = installed().await;
        let url = request("login.html").url;
        let post = AssetRequest::new(Method::Post, url.clone()).with_body(b"x=1".to_vec());
        let before = fetcher.call_count();

        let resolution = manager.handle(post.clone()).await.unwrap();
        assert_eq!(resolution.source(), Some(Source::Network));
        assert_eq!(fetcher.call_count(), before + 1);

        let store = storage.inner.open("kaibora-cache-v1").await.unwrap();
        assert!(store.lookup(&post.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_manager_passes_through() {
        let (manager, storage, fetcher) = setup();
        manager.install().await.unwrap();
        let opens_before = storage.opens.load(Ordering::SeqCst);
        let before = fetcher.call_count();

        let resolution = manager.handle(request("login.html")).await.unwrap();
        assert_eq!(resolution.source(), Some(Source::Passthrough));
        assert_eq!(fetcher.call_count(), before + 1);
        assert_eq!(storage.opens.load(Ordering::SeqCst), opens_before);
    }

    #[tokio::test]
    async fn test_activate_removes_stale_generations() {
        let (manager, storage, _fetcher) = setup();
        storage.inner.open("kaibora-cache-v0").await.unwrap();
        manager.install().await.unwrap();

        let removed = manager.activate().await.unwrap();
        assert_eq!(removed, vec!["kaibora-cache-v0".to_string()]);
        assert_eq!(storage.inner.names().await.unwrap(), vec!["kaibora-cache-v1".to_string()]);
        assert!(manager.is_active());
    }

    #[tokio::test]
    async fn test_activate_before_install_keeps_previous_shell() {
        let (manager, storage, fetcher) = setup();
        let previous = storage.inner.open("kaibora-cache-v0").await.unwrap();
        previous
            .put(request("login.html").key(), StoredResponse::new(200, "<html>v0</html>"))
            .await
            .unwrap();
        fetcher.set_offline(true);

        let removed = manager.activate().await.unwrap();
        assert!(removed.is_empty());
        assert!(manager.is_active());
        assert!(storage.inner.has("kaibora-cache-v0").await.unwrap());
        let entry = previous.lookup(&request("login.html").key()).await.unwrap();
        assert_eq!(entry.unwrap().response.body, b"<html>v0</html>");

        // Once the new generation is installed the old one goes
        fetcher.set_offline(false);
        manager.install().await.unwrap();
        let removed = manager.activate().await.unwrap();
        assert_eq!(removed, vec!["kaibora-cache-v0".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_trusts_generation_installed_by_earlier_run() {
        let (first, storage, fetcher) = setup();
        first.install().await.unwrap();
        storage.inner.open("kaibora-cache-v0").await.unwrap();

        // A fresh manager over the same storage, as a new process would be
        let second = OfflineCacheManager::new(storage.clone(), Arc::clone(&fetcher), CacheSettings::default());
        let removed = second.activate().await.unwrap();
        assert_eq!(removed, vec!["kaibora-cache-v0".to_string()]);
    }

    #[tokio::test]
    async fn test_resume_serves_cache_without_cleanup() {
        let (first, storage, fetcher) = setup();
        first.install().await.unwrap();
        storage.inner.open("kaibora-cache-v0").await.unwrap();
        let before = fetcher.call_count();

        let second = OfflineCacheManager::new(storage.clone(), Arc::clone(&fetcher), CacheSettings::default());
        second.resume();
        let resolution = second.handle(request("login.css")).await.unwrap();
        assert_eq!(resolution.source(), Some(Source::Cache));
        assert_eq!(fetcher.call_count(), before);
        assert!(storage.inner.has("kaibora-cache-v0").await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_completes_after_caller_drops_handle() {
        let (manager, storage, fetcher) = installed().await;
        let manager = Arc::new(manager);
        let extra = request("static/late.css");
        fetcher.serve(extra.url.as_str(), StoredResponse::new(200, "p{}"));

        let pending = manager.dispatch(extra.clone());
        let resolution = pending.await.unwrap().unwrap();
        assert_eq!(resolution.source(), Some(Source::Network));

        let store = storage.inner.open("kaibora-cache-v1").await.unwrap();
        assert!(store.lookup(&extra.key()).await.unwrap().is_some());

        let dropped = request("static/dropped.css");
        fetcher.serve(dropped.url.as_str(), StoredResponse::new(200, "a{}"));
        drop(manager.dispatch(dropped.clone()));

        let mut cached = false;
        for _ in 0..100 {
            if store.lookup(&dropped.key()).await.unwrap().is_some() {
                cached = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(cached, "detached task never cached the response");
    }

    #[tokio::test]
    async fn test_concurrent_misses_for_same_key() {
        let (manager, storage, fetcher) = installed().await;
        let manager = Arc::new(manager);
        let extra = request("static/shared.css");
        fetcher.serve(extra.url.as_str(), StoredResponse::new(200, "body{}"));

        let handles: Vec<_> = (0..4).map(|_| manager.dispatch(extra.clone())).collect();
        for handle in handles {
            let resolution = handle.await.unwrap().unwrap();
            assert_eq!(resolution.response().unwrap().body, b"body{}");
        }

        let store = storage.inner.open("kaibora-cache-v1").await.unwrap();
        let keys = store.keys().await.unwrap();
        assert_eq!(keys.iter().filter(|k| **k == extra.key()).count(), 1);
    }
}
