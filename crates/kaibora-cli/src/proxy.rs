//! Local HTTP proxy hosting the offline cache manager.
//!
//! Every incoming request is rebuilt against the configured origin and
//! dispatched through the manager. The response carries an
//! `x-kaibora-source` header naming where it came from.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method as HttpMethod, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};
use url::Url;

use kaibora_core::{AssetRequest, Method, Resolution};

use crate::Manager;

const SOURCE_HEADER: &str = "x-kaibora-source";

/// Connection-level headers that must not be forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

pub async fn serve(manager: Arc<Manager>, listen: SocketAddr) -> Result<()> {
    let origin = manager.settings().origin.clone();
    let app = Router::new().fallback(proxy).with_state(manager);

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!(%listen, %origin, "Proxy listening");
    println!("Serving {} on http://{}", origin, listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Proxy server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn proxy(
    State(manager): State<Arc<Manager>>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match to_asset_request(&manager.settings().origin, &method, &uri, &headers, body) {
        Ok(request) => request,
        Err(rejection) => return rejection.into_response(),
    };

    // Awaiting the task, not the future: a client disconnect drops this
    // handler but not the fetch and cache write behind it.
    match manager.dispatch(request).await {
        Ok(Ok(resolution)) => into_http_response(resolution),
        Ok(Err(e)) => {
            warn!(%uri, error = %e, "Upstream request failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
        Err(e) => {
            warn!(%uri, error = %e, "Request task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn to_asset_request(
    origin: &Url,
    method: &HttpMethod,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<AssetRequest, (StatusCode, String)> {
    let method: Method = method
        .as_str()
        .parse()
        .map_err(|e: String| (StatusCode::METHOD_NOT_ALLOWED, e))?;
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = origin
        .join(target)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut request = AssetRequest::new(method, url);
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        request = request.with_body(body.to_vec());
    }
    Ok(request)
}

/// `Unavailable` has no response to give; the page sees a bare 502.
fn into_http_response(resolution: Resolution) -> Response {
    let source = resolution.source();
    let Some(stored) = resolution.into_response() else {
        return StatusCode::BAD_GATEWAY.into_response();
    };

    let mut response = Response::new(Body::from(stored.body));
    *response.status_mut() = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = response.headers_mut();
    for (name, value) in &stored.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.append(name, value);
        }
    }
    if let Some(source) = source {
        headers.insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));
    }
    response
}
