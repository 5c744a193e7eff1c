//! Network access for the offline cache.
//!
//! This module provides the `Fetcher` seam the cache manager falls back to
//! on a miss, and `HttpFetcher`, its reqwest-backed implementation. Every
//! fetch is a single attempt: no retries, no backoff.

pub mod client;
pub mod error;

pub use client::{Fetcher, HttpFetcher};
pub use error::FetchError;
