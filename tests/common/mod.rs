//! Shared fixtures: a scriptable Stalker portal, a CDN with redirect chains,
//! and helpers to wire the proxy pipeline against them.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use stalker_proxy::config::{PortalConfig, ProxyConfig};
use stalker_proxy::errors::{PortalError, PortalResult};
use stalker_proxy::proxy::{ProxyPipeline, UpstreamIdentity};
use stalker_proxy::services::AuthStore;
use stalker_proxy::sources::StreamResolver;
use stalker_proxy::utils::HttpClientFactory;

pub const TEST_MAC: &str = "00:1A:79:12:34:56";
pub const HANDSHAKE_TOKEN: &str = "T1";
pub const SESSION_COOKIE: &str = "PHPSESSID=sess42";
pub const TEST_USER_AGENT: &str = "TestBox/1.0";
pub const TEST_X_USER_AGENT: &str = "Model: MAG250; Link: WiFi";
pub const SEGMENT_BYTES: &[u8] = b"\x47segment-one-payload";

/// Media playlist served at the end of every redirect chain
pub const MEDIA_PLAYLIST: &str = "#EXTM3U\r\n\
#EXT-X-VERSION:3\r\n\
#EXT-X-TARGETDURATION:4\r\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\r\n\
\r\n\
#EXTINF:4.0,\r\n\
seg-1.ts\r\n\
#EXTINF:4.0,\r\n\
/abs/seg-2.ts\r\n";

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

// ---------------------------------------------------------------------------
// Portal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PortalBehavior {
    /// Landing page carries the ban marker
    pub banned: bool,
    /// Number of login profile calls answered with 500 before succeeding
    pub profile_failures: usize,
    /// Login profile answers with the plain-text refusal
    pub authorization_failed: bool,
    /// `get_all_channels` answers without a data array
    pub all_channels_missing: bool,
    /// Handshake answers without a token
    pub handshake_without_token: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub params: HashMap<String, String>,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(Default)]
pub struct PortalState {
    pub behavior: PortalBehavior,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub landing_hits: AtomicUsize,
    pub login_profile_calls: AtomicUsize,
    pub keep_alive_calls: AtomicUsize,
    pub all_channels_calls: AtomicUsize,
}

pub struct MockPortal {
    /// Portal URL as a user would enter it, e.g. `http://127.0.0.1:1234/c/`
    pub url: String,
    pub state: Arc<PortalState>,
}

impl MockPortal {
    pub async fn start(behavior: PortalBehavior) -> Self {
        let state = Arc::new(PortalState {
            behavior,
            ..Default::default()
        });

        let app = Router::new()
            .route("/c/", get(landing))
            .route("/c/server/load.php", get(load_php).post(load_php))
            .with_state(Arc::clone(&state));

        let origin = serve(app).await;
        Self {
            url: format!("{origin}/c/"),
            state,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, action: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.param("action") == Some(action))
            .collect()
    }

    pub fn keep_alive_calls(&self) -> usize {
        self.state.keep_alive_calls.load(Ordering::SeqCst)
    }

    pub fn all_channels_calls(&self) -> usize {
        self.state.all_channels_calls.load(Ordering::SeqCst)
    }
}

async fn landing(State(state): State<Arc<PortalState>>) -> Response {
    state.landing_hits.fetch_add(1, Ordering::SeqCst);
    let body = if state.behavior.banned {
        "<html><body>Your STB is BANNED</body></html>"
    } else {
        "<html><body>Stalker middleware</body></html>"
    };
    (
        StatusCode::OK,
        [(header::SET_COOKIE, "landing=seen; path=/")],
        body,
    )
        .into_response()
}

async fn load_php(
    State(state): State<Arc<PortalState>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let params: HashMap<String, String> = if method == Method::POST {
        url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect()
    } else {
        query
    };
    let header_text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state.calls.lock().unwrap().push(RecordedCall {
        method,
        params: params.clone(),
        authorization: header_text(header::AUTHORIZATION),
        cookie: header_text(header::COOKIE),
    });

    let action = params.get("action").map(String::as_str).unwrap_or_default();
    match action {
        "handshake" => {
            let js = if state.behavior.handshake_without_token {
                json!({})
            } else {
                json!({"token": HANDSHAKE_TOKEN})
            };
            (
                [(header::SET_COOKIE, format!("{SESSION_COOKIE}; path=/"))],
                axum::Json(json!({"js": js})),
            )
                .into_response()
        }
        "get_profile" if params.contains_key("hd") => {
            let attempt = state.login_profile_calls.fetch_add(1, Ordering::SeqCst);
            if attempt < state.behavior.profile_failures {
                return (StatusCode::INTERNAL_SERVER_ERROR, "profile unavailable").into_response();
            }
            if state.behavior.authorization_failed {
                return "Authorization failed".into_response();
            }
            axum::Json(json!({
                "js": {"id": "42", "name": "Living room", "token": HANDSHAKE_TOKEN},
                "text": "ok"
            }))
            .into_response()
        }
        "get_profile" => {
            state.keep_alive_calls.fetch_add(1, Ordering::SeqCst);
            axum::Json(json!({"js": {"id": "42"}})).into_response()
        }
        "get_genres" => axum::Json(json!({
            "js": [
                {"id": "*", "title": "All"},
                {"id": 1, "title": "News", "alias": "news", "censored": "0"},
                {"id": "2", "title": "Sports", "number": 2}
            ]
        }))
        .into_response(),
        "get_ordered_list" => {
            let genre = params.get("genre").map(String::as_str).unwrap_or("*");
            let data: Vec<Value> = channel_fixtures()
                .into_iter()
                .filter(|channel| {
                    genre == "*"
                        || genre == "0"
                        || channel["tv_genre_id"].as_str() == Some(genre)
                })
                .collect();
            axum::Json(json!({"js": {"total_items": data.len(), "data": data}})).into_response()
        }
        "get_all_channels" => {
            state.all_channels_calls.fetch_add(1, Ordering::SeqCst);
            if state.behavior.all_channels_missing {
                axum::Json(json!({"js": {}})).into_response()
            } else {
                axum::Json(json!({"js": {"data": channel_fixtures()}})).into_response()
            }
        }
        "create_link" => {
            let cmd = params.get("cmd").cloned().unwrap_or_default();
            axum::Json(json!({"js": {"id": "10", "cmd": cmd}})).into_response()
        }
        "get_short_epg" => axum::Json(json!({
            "js": [
                {
                    "id": "1001",
                    "ch_id": params.get("ch_id"),
                    "name": "Morning News",
                    "time": "2024-01-01 08:00:00",
                    "time_to": "2024-01-01 09:00:00",
                    "duration": 3600,
                    "start_timestamp": "1704096000",
                    "stop_timestamp": 1704099600
                },
                {"id": 1002, "ch_id": params.get("ch_id"), "name": "Weather", "duration": ""}
            ]
        }))
        .into_response(),
        "get_epg_info" => axum::Json(json!({
            "js": {
                "data": {
                    "10": [{"id": "1", "ch_id": "10", "name": "Headlines"}],
                    "11": [
                        {"id": "2", "ch_id": "11", "name": "Match of the Day"},
                        {"id": "3", "ch_id": "11", "name": "Highlights"}
                    ]
                }
            }
        }))
        .into_response(),
        _ => axum::Json(json!({"js": null})).into_response(),
    }
}

pub fn channel_fixtures() -> Vec<Value> {
    vec![
        json!({
            "id": "10",
            "name": "BBC News",
            "number": "1",
            "cmd": "ffmpeg http://cdn.test/ch/10?extension=ts",
            "logo": "",
            "tv_genre_id": "1"
        }),
        json!({
            "id": 11,
            "name": "Sky Sports",
            "title": "SKY SPORTS HD",
            "number": 2,
            "cmd": "ffmpeg http://cdn.test/ch/11",
            "tv_genre_id": "2"
        }),
        json!({
            "id": "12",
            "name": "Cartoon Box",
            "alias": "kids news",
            "cmd": "ffmpeg http://cdn.test/ch/12",
            "tv_genre_id": "3"
        }),
    ]
}

/// Portal settings with test-sized pauses
pub fn portal_config() -> PortalConfig {
    PortalConfig {
        login_pacing: Duration::from_millis(5),
        profile_retry_delay: Duration::from_millis(5),
        request_timeout: Duration::from_secs(5),
        ..PortalConfig::default()
    }
}

// ---------------------------------------------------------------------------
// CDN
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CdnRequest {
    pub path: String,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    pub x_user_agent: Option<String>,
}

#[derive(Default)]
pub struct CdnState {
    pub requests: Mutex<Vec<CdnRequest>>,
}

/// Upstream origin.
///
/// `/{kind}/{n}/index.m3u8` redirects `n` times (relative `Location`) before
/// serving [`MEDIA_PLAYLIST`]. The kind picks the redirect: `chain` is 302,
/// `moved` is 301, `temp` is 307 and `bare` is a 302 without `Location`.
/// `seg-1.ts` and `key.bin` are served from any chain directory.
pub struct MockCdn {
    pub origin: String,
    pub state: Arc<CdnState>,
}

impl MockCdn {
    pub async fn start() -> Self {
        let state = Arc::new(CdnState::default());
        let app = Router::new()
            .route("/{kind}/{hops}/{file}", get(chain))
            .with_state(Arc::clone(&state));
        let origin = serve(app).await;
        Self { origin, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.origin, path)
    }

    pub fn requests(&self) -> Vec<CdnRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, path: &str) -> Vec<CdnRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }
}

async fn chain(
    State(state): State<Arc<CdnState>>,
    Path((kind, hops, file)): Path<(String, usize, String)>,
    headers: HeaderMap,
) -> Response {
    let header_text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(CdnRequest {
        path: format!("/{kind}/{hops}/{file}"),
        cookie: header_text("cookie"),
        user_agent: header_text("user-agent"),
        x_user_agent: header_text("x-user-agent"),
    });

    match file.as_str() {
        "index.m3u8" if hops > 0 => {
            let status = match kind.as_str() {
                "moved" => StatusCode::MOVED_PERMANENTLY,
                "temp" => StatusCode::TEMPORARY_REDIRECT,
                "bare" => return StatusCode::FOUND.into_response(),
                _ => StatusCode::FOUND,
            };
            (
                status,
                [(header::LOCATION, format!("/{kind}/{}/index.m3u8", hops - 1))],
            )
                .into_response()
        }
        "index.m3u8" => (
            [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
            MEDIA_PLAYLIST,
        )
            .into_response(),
        "seg-1.ts" => ([(header::CONTENT_TYPE, "video/MP2T")], SEGMENT_BYTES).into_response(),
        "key.bin" => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            &b"0123456789abcdef"[..],
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Proxy wiring
// ---------------------------------------------------------------------------

/// Resolves a command `<path>` to `<origin>/<path>`; commands starting with
/// `fail` are refused
pub struct CdnResolver {
    origin: String,
    pub requests: Mutex<Vec<(String, Option<i64>)>>,
}

impl CdnResolver {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StreamResolver for CdnResolver {
    async fn resolve_stream(&self, cmd: &str, start: Option<i64>) -> PortalResult<String> {
        self.requests
            .lock()
            .unwrap()
            .push((cmd.to_string(), start));
        if cmd.starts_with("fail") {
            return Err(PortalError::stream_resolution("no link for channel"));
        }
        let mut url = format!("{}/{}", self.origin, cmd.trim_start_matches('/'));
        if let Some(start) = start {
            url.push_str(&format!("?utc={start}"));
        }
        Ok(url)
    }
}

pub fn proxy_config() -> ProxyConfig {
    ProxyConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        playlist_timeout: Duration::from_secs(3),
        segment_timeout: Duration::from_secs(3),
        redirect_timeout: Duration::from_secs(3),
        max_redirects: 10,
    }
}

pub fn test_identity() -> UpstreamIdentity {
    UpstreamIdentity {
        user_agent: TEST_USER_AGENT.to_string(),
        x_user_agent: TEST_X_USER_AGENT.to_string(),
    }
}

pub fn pipeline(
    resolver: Arc<dyn StreamResolver>,
    auth_store: Arc<dyn AuthStore>,
) -> Arc<ProxyPipeline> {
    Arc::new(
        ProxyPipeline::new(
            resolver,
            auth_store,
            test_identity(),
            proxy_config(),
            &HttpClientFactory::default(),
        )
        .unwrap(),
    )
}
