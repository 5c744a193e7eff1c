//! Network fetcher used by the cache manager.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use crate::models::{AssetRequest, StoredResponse};

use super::FetchError;

/// HTTP request timeout in seconds.
/// Applied by the transport; the cache manager itself never times a request out.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One network attempt for an intercepted request.
///
/// Non-2xx statuses are a successful fetch: like the browser's `fetch`, only
/// transport failures are errors. Callers decide what a status means.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<StoredResponse, FetchError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for std::sync::Arc<T> {
    async fn fetch(&self, request: &AssetRequest) -> Result<StoredResponse, FetchError> {
        (**self).fetch(request).await
    }
}

/// Copy response headers into owned pairs.
///
/// Values that are not visible ASCII cannot be represented as strings and are
/// dropped, with a debug line naming the header.
fn collect_headers(headers: &header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(v) => Some((name.as_str().to_string(), v.to_string())),
            Err(_) => {
                debug!(header = %name, bytes = value.len(), "Dropping non-text header value");
                None
            }
        })
        .collect()
}

/// reqwest-backed fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<StoredResponse, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?.to_vec();

        debug!(method = %request.method, url = %request.url, status, bytes = body.len(), "Fetched from network");

        Ok(StoredResponse {
            status,
            headers,
            body,
            url,
        })
    }
}
