mod common;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum_test::TestServer;
use std::sync::Arc;

use common::{
    CdnResolver, MockCdn, MockPortal, PortalBehavior, SEGMENT_BYTES, TEST_MAC, TEST_USER_AGENT,
    TEST_X_USER_AGENT, pipeline, portal_config,
};
use stalker_proxy::models::{AuthRecord, HttpMethod};
use stalker_proxy::errors::ProxyError;
use stalker_proxy::proxy::encode_token;
use stalker_proxy::proxy::playlist::segment_url;
use stalker_proxy::proxy::redirect::follow_redirects;
use stalker_proxy::services::{AuthStore, FileAuthStore, MemoryAuthStore};
use stalker_proxy::sources::PortalClient;
use stalker_proxy::web::{AppState, ProxyServer, ProxyStatus, build_router};

const PROXY_ORIGIN: &str = "http://127.0.0.1:5000";

struct Harness {
    cdn: MockCdn,
    resolver: Arc<CdnResolver>,
    server: TestServer,
}

async fn harness(auth_store: Arc<dyn AuthStore>) -> Harness {
    let cdn = MockCdn::start().await;
    let resolver = Arc::new(CdnResolver::new(cdn.origin.clone()));
    let app = build_router(AppState {
        pipeline: pipeline(resolver.clone(), auth_store),
        proxy_origin: Arc::from(PROXY_ORIGIN),
    });
    Harness {
        cdn,
        resolver,
        server: TestServer::new(app).unwrap(),
    }
}

fn stored_session() -> Arc<dyn AuthStore> {
    Arc::new(MemoryAuthStore::with_record(AuthRecord {
        mac: TEST_MAC.to_string(),
        portal_url: "http://portal.test/c/".to_string(),
        cookies: Some("PHPSESSID=sess42".to_string()),
    }))
}

fn playlist_path(cmd: &str) -> String {
    format!("/playlist/{}", encode_token(cmd))
}

fn segment_path(url: &str) -> String {
    format!("/segment?url={}", urlencoding::encode(&encode_token(url)))
}

#[tokio::test]
async fn test_playlist_is_rewritten_after_ten_redirects() {
    let h = harness(stored_session()).await;

    let response = h.server.get(&playlist_path("chain/10/index.m3u8")).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.apple.mpegurl"
    );
    let key_url = segment_url(PROXY_ORIGIN, &h.cdn.url("/chain/0/key.bin"));
    let first = segment_url(PROXY_ORIGIN, &h.cdn.url("/chain/0/seg-1.ts"));
    let second = segment_url(PROXY_ORIGIN, &h.cdn.url("/abs/seg-2.ts"));
    let expected = [
        "#EXTM3U".to_string(),
        "#EXT-X-VERSION:3".to_string(),
        "#EXT-X-TARGETDURATION:4".to_string(),
        format!("#EXT-X-KEY:METHOD=AES-128,URI=\"{key_url}\""),
        String::new(),
        "#EXTINF:4.0,".to_string(),
        first,
        "#EXTINF:4.0,".to_string(),
        second,
        String::new(),
    ]
    .join("\n");
    assert_eq!(response.text(), expected);

    // 10 redirects plus the final fetch of the playlist itself
    assert_eq!(h.cdn.requests_for("/chain/10/index.m3u8").len(), 1);
    assert_eq!(h.cdn.requests_for("/chain/0/index.m3u8").len(), 2);
}

#[tokio::test]
async fn test_eleven_redirects_are_refused() {
    let h = harness(stored_session()).await;

    let response = h.server.get(&playlist_path("chain/11/index.m3u8")).await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text(), "Failed to fetch playlist");
    assert!(h.cdn.requests_for("/chain/0/index.m3u8").is_empty());
}

#[tokio::test]
async fn test_permanent_redirect_chain_is_followed() {
    let h = harness(stored_session()).await;

    let response = h.server.get(&playlist_path("moved/3/index.m3u8")).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let first = segment_url(PROXY_ORIGIN, &h.cdn.url("/moved/0/seg-1.ts"));
    assert!(response.text().lines().any(|line| line == first));
    assert_eq!(h.cdn.requests_for("/moved/3/index.m3u8").len(), 1);
}

#[tokio::test]
async fn test_redirect_without_location_is_bad_gateway() {
    let h = harness(stored_session()).await;

    let response = h.server.get(&playlist_path("bare/2/index.m3u8")).await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text(), "Failed to fetch playlist");
    assert_eq!(h.cdn.requests().len(), 1);

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let start = h.cdn.url("/bare/2/index.m3u8");
    let result = follow_redirects(&client, &start, &HeaderMap::new(), 10).await;
    assert!(matches!(result, Err(ProxyError::MissingLocation { ref url }) if *url == start));
}

#[tokio::test]
async fn test_temporary_redirect_is_not_followed() {
    let h = harness(stored_session()).await;

    let response = h.server.get(&playlist_path("temp/1/index.m3u8")).await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text(), "Failed to fetch playlist");
    assert!(h.cdn.requests_for("/temp/0/index.m3u8").is_empty());
}

#[tokio::test]
async fn test_upstream_requests_carry_device_identity() {
    let h = harness(stored_session()).await;

    h.server.get(&playlist_path("chain/1/index.m3u8")).await;

    let requests = h.cdn.requests();
    assert_eq!(requests.len(), 3);
    for request in requests {
        assert_eq!(request.cookie.as_deref(), Some("PHPSESSID=sess42"));
        assert_eq!(request.user_agent.as_deref(), Some(TEST_USER_AGENT));
        assert_eq!(request.x_user_agent.as_deref(), Some(TEST_X_USER_AGENT));
    }
}

#[tokio::test]
async fn test_timeshift_start_reaches_resolver() {
    let h = harness(stored_session()).await;

    let path = format!("{}?utc=1700000000", playlist_path("chain/0/index.m3u8"));
    let response = h.server.get(&path).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        h.resolver.requests.lock().unwrap().as_slice(),
        [("chain/0/index.m3u8".to_string(), Some(1_700_000_000))]
    );
}

#[tokio::test]
async fn test_resolution_failure_is_bad_gateway() {
    let h = harness(stored_session()).await;

    let response = h.server.get(&playlist_path("fail/10")).await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert!(response.text().starts_with("Failed to fetch playlist"));
    assert!(h.cdn.requests().is_empty());
}

#[tokio::test]
async fn test_undecodable_playlist_token_is_bad_gateway() {
    let h = harness(stored_session()).await;

    let response = h.server.get("/playlist/not*base64!").await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text(), "Failed to fetch playlist");
}

#[tokio::test]
async fn test_non_utf8_playlist_token_is_bad_gateway() {
    let h = harness(stored_session()).await;

    let response = h.server.get("/playlist/%FF%FE").await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text(), "Failed to fetch playlist");
}

#[tokio::test]
async fn test_repeated_query_parameters_use_first_value() {
    let h = harness(stored_session()).await;

    let path = format!(
        "{}?utc=1700000000&utc=42",
        playlist_path("chain/0/index.m3u8")
    );
    let response = h.server.get(&path).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        h.resolver.requests.lock().unwrap().as_slice(),
        [("chain/0/index.m3u8".to_string(), Some(1_700_000_000))]
    );

    let token = urlencoding::encode(&encode_token(&h.cdn.url("/chain/0/seg-1.ts"))).into_owned();
    let response = h
        .server
        .get(&format!("/segment?url={token}&url=aGk%3D"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.as_bytes().as_ref(), SEGMENT_BYTES);
}

#[tokio::test]
async fn test_segment_is_streamed_through() {
    let h = harness(stored_session()).await;

    let response = h
        .server
        .get(&segment_path(&h.cdn.url("/chain/0/seg-1.ts")))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "video/MP2T"
    );
    assert_eq!(response.as_bytes().as_ref(), SEGMENT_BYTES);

    let seen = h.cdn.requests_for("/chain/0/seg-1.ts");
    assert_eq!(seen[0].cookie.as_deref(), Some("PHPSESSID=sess42"));
}

#[tokio::test]
async fn test_segment_without_auth_record_sends_no_cookie() {
    let h = harness(Arc::new(MemoryAuthStore::new())).await;

    let response = h
        .server
        .get(&segment_path(&h.cdn.url("/chain/0/key.bin")))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let seen = h.cdn.requests_for("/chain/0/key.bin");
    assert_eq!(seen[0].cookie, None);
    assert_eq!(seen[0].user_agent.as_deref(), Some(TEST_USER_AGENT));
}

#[tokio::test]
async fn test_segment_upstream_error_is_bad_gateway() {
    let h = harness(stored_session()).await;

    let missing = h
        .server
        .get(&segment_path(&h.cdn.url("/chain/0/missing.ts")))
        .await;
    assert_eq!(missing.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(missing.text(), "Failed to fetch segment");

    let unreachable = h
        .server
        .get(&segment_path("http://127.0.0.1:1/seg.ts"))
        .await;
    assert_eq!(unreachable.status_code(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_unknown_routes_are_not_found() {
    let h = harness(stored_session()).await;

    let response = h.server.get("/channels").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "Not found");

    let response = h.server.get("/segment").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_options_is_answered_with_cors_headers() {
    let h = harness(stored_session()).await;

    let response = h
        .server
        .method(Method::OPTIONS, "/segment")
        .add_header(header::ORIGIN, HeaderValue::from_static("http://player.test"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert!(h.cdn.requests().is_empty());
}

#[tokio::test]
async fn test_error_responses_allow_any_origin() {
    let h = harness(stored_session()).await;

    let response = h
        .server
        .get("/nowhere")
        .add_header(header::ORIGIN, HeaderValue::from_static("http://player.test"))
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_server_lifecycle_is_idempotent() {
    let cdn = MockCdn::start().await;
    let resolver = Arc::new(CdnResolver::new(cdn.origin.clone()));
    let server = ProxyServer::new(pipeline(resolver, stored_session()));

    assert_eq!(server.status().await, ProxyStatus::Stopped);
    server.stop().await;

    let port = server.start().await.unwrap();
    assert_ne!(port, 0);
    assert_eq!(server.start().await.unwrap(), port);
    assert_eq!(server.status().await, ProxyStatus::Listening { port });

    server.stop().await;
    server.stop().await;
    assert_eq!(server.status().await, ProxyStatus::Stopped);
    assert_eq!(server.port().await, None);

    let refused = reqwest::get(format!("http://127.0.0.1:{port}/segment")).await;
    assert!(refused.is_err());
}

#[tokio::test]
async fn test_listener_survives_failed_segment() {
    let cdn = MockCdn::start().await;
    let resolver = Arc::new(CdnResolver::new(cdn.origin.clone()));
    let server = ProxyServer::new(pipeline(resolver, stored_session()));

    let stream_url = server.stream_url("chain/2/index.m3u8").await.unwrap();
    let port = server.port().await.unwrap();
    assert_eq!(
        stream_url,
        format!(
            "http://127.0.0.1:{port}/playlist/{}",
            encode_token("chain/2/index.m3u8")
        )
    );

    let failed = reqwest::get(format!(
        "http://127.0.0.1:{port}{}",
        segment_path("http://127.0.0.1:1/seg.ts")
    ))
    .await
    .unwrap();
    assert_eq!(failed.status(), reqwest::StatusCode::BAD_GATEWAY);

    let playlist = reqwest::get(&stream_url).await.unwrap();
    assert_eq!(playlist.status(), reqwest::StatusCode::OK);
    let body = playlist.text().await.unwrap();
    let segment_line = body
        .lines()
        .find(|line| line.contains("/segment?url=") && !line.starts_with('#'))
        .unwrap()
        .to_string();
    assert!(segment_line.starts_with(&format!("http://127.0.0.1:{port}/segment?url=")));

    let segment = reqwest::get(&segment_line).await.unwrap();
    assert_eq!(segment.status(), reqwest::StatusCode::OK);
    assert_eq!(segment.bytes().await.unwrap().as_ref(), SEGMENT_BYTES);

    server.stop().await;
}

#[tokio::test]
async fn test_stream_url_for_timeshift_carries_utc() {
    let cdn = MockCdn::start().await;
    let resolver = Arc::new(CdnResolver::new(cdn.origin.clone()));
    let server = ProxyServer::new(pipeline(resolver, stored_session()));

    let url = server
        .stream_url_at("chain/0/index.m3u8", Some(1_700_000_000))
        .await
        .unwrap();

    assert!(url.ends_with("?utc=1700000000"));
    assert_eq!(url.matches("utc=").count(), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_portal_session_drives_proxy_end_to_end() {
    let portal = MockPortal::start(PortalBehavior::default()).await;
    let cdn = MockCdn::start().await;

    let client = Arc::new(PortalClient::new(portal_config()).unwrap());
    client
        .login(TEST_MAC, &portal.url, HttpMethod::Get)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn AuthStore> = Arc::new(FileAuthStore::new(dir.path().join("auth.json")));
    store
        .save(&client.auth_record().await.unwrap())
        .await
        .unwrap();

    let server = ProxyServer::new(pipeline(client, store));
    let cmd = format!("ffmpeg {}", cdn.url("/chain/2/index.m3u8"));
    let stream_url = server.stream_url(&cmd).await.unwrap();

    let response = reqwest::get(&stream_url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.text().await.unwrap().contains("/segment?url="));

    assert_eq!(portal.calls_for("create_link").len(), 1);
    let fetched = cdn.requests_for("/chain/0/index.m3u8");
    assert!(
        fetched[0]
            .cookie
            .as_deref()
            .unwrap()
            .contains("PHPSESSID=sess42")
    );

    server.stop().await;
}
