//! Upstream fetches with the legacy set-top-box identity, and the HTTP
//! responses the proxy routes build from them.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode, header};
use futures::TryStreamExt;
use reqwest::Client;
use reqwest::header::{COOKIE, HeaderMap, USER_AGENT};
use tracing::{debug, error, warn};

use crate::config::PortalConfig;
use crate::errors::{ProxyError, ProxyResult};
use crate::utils::{UrlUtils, X_USER_AGENT};

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const DEFAULT_SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

/// Identity presented to upstream CDNs
#[derive(Debug, Clone)]
pub struct UpstreamIdentity {
    pub user_agent: String,
    pub x_user_agent: String,
}

impl From<&PortalConfig> for UpstreamIdentity {
    fn from(config: &PortalConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            x_user_agent: config.x_user_agent.clone(),
        }
    }
}

impl UpstreamIdentity {
    /// Legacy device headers plus the session cookie, when there is one.
    ///
    /// Values that are not valid header text are left out.
    pub fn headers(&self, cookie: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.x_user_agent) {
            headers.insert(X_USER_AGENT, value);
        }
        if let Some(cookie) = cookie
            && let Ok(value) = HeaderValue::from_str(cookie)
        {
            headers.insert(COOKIE, value);
        }
        headers
    }
}

/// GET a playlist as text; non-2xx is an error
pub async fn fetch_playlist_text(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    timeout: Duration,
) -> ProxyResult<String> {
    let response = client
        .get(url)
        .headers(headers.clone())
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ProxyError::upstream(url, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProxyError::upstream(url, format!("status {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| ProxyError::upstream(url, e.to_string()))
}

/// GET a media segment and stream its body straight through
pub async fn stream_segment(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    timeout: Duration,
) -> ProxyResult<Response<Body>> {
    let upstream = client
        .get(url)
        .headers(headers.clone())
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ProxyError::upstream(url, e.to_string()))?;

    let status = upstream.status();
    if !status.is_success() {
        return Err(ProxyError::upstream(url, format!("status {status}")));
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SEGMENT_CONTENT_TYPE)
        .to_string();
    let content_length = upstream.content_length();

    debug!(
        "Segment upstream accepted: ct={} cl={:?} url={}",
        content_type,
        content_length,
        UrlUtils::obfuscate_credentials(url)
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache");
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    let source = UrlUtils::obfuscate_credentials(url);
    let body = upstream
        .bytes_stream()
        .inspect_err(move |e| warn!("Segment stream from {} interrupted: {}", source, e));

    builder
        .body(Body::from_stream(body))
        .map_err(|e| ProxyError::upstream(url, format!("failed to build response: {e}")))
}

/// 200 with the rewritten playlist
pub fn playlist_response(playlist: String) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(playlist))
        .unwrap_or_else(|e| {
            error!("Failed building playlist response: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response")
        })
}

/// Plain-text error response
pub fn error_response(status: StatusCode, msg: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(msg.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
