//! Kaibora core library.
//!
//! Offline support for the Kaibora guide front-end:
//!
//! - `cache`: the offline asset cache manager and its named cache stores
//! - `api`: the network fetcher the cache manager falls back to
//! - `registration`: adventurer registration against the guild backend
//! - `config`: application configuration and storage locations

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod registration;

pub use api::{FetchError, Fetcher, HttpFetcher};
pub use cache::{CacheError, CacheSettings, OfflineCacheManager, Resolution};
pub use config::Config;
pub use models::{AssetRequest, Method, RequestKey, StoredResponse};
