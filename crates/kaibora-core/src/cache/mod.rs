//! Offline asset caching.
//!
//! This module provides the `OfflineCacheManager`, which serves the
//! application shell without network access, and the named cache stores it
//! persists responses in.
//!
//! - `store`: the `CacheStorage`/`CacheStore` seams and an in-memory provider
//! - `disk`: a durable provider, one directory per cache name
//! - `manager`: install, activate and the cache-first request handler

pub mod disk;
pub mod manager;
pub mod store;

pub use disk::{DiskStorage, DiskStore};
pub use manager::{CacheSettings, InstallError, InstallReport, OfflineCacheManager, Resolution, Source};
pub use store::{CacheError, CacheStorage, CacheStore, MemoryStorage, MemoryStore};
