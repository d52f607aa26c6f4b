//! Per-request proxy pipeline: resolve, follow redirects, fetch, rewrite.
//!
//! Nothing here is cached between requests. Stream links are short-lived, so
//! every playlist request asks the resolver for a fresh one.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Response;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};
use url::Url;

use super::http_stream::{UpstreamIdentity, fetch_playlist_text, stream_segment};
use super::playlist::PlaylistRewriter;
use super::redirect::follow_redirects;
use crate::config::ProxyConfig;
use crate::errors::{AppResult, ProxyError, ProxyResult};
use crate::services::AuthStore;
use crate::sources::StreamResolver;
use crate::utils::{HttpClientFactory, UrlUtils};

pub struct ProxyPipeline {
    resolver: Arc<dyn StreamResolver>,
    auth_store: Arc<dyn AuthStore>,
    identity: UpstreamIdentity,
    redirect_client: Client,
    upstream_client: Client,
    config: ProxyConfig,
}

impl ProxyPipeline {
    pub fn new(
        resolver: Arc<dyn StreamResolver>,
        auth_store: Arc<dyn AuthStore>,
        identity: UpstreamIdentity,
        config: ProxyConfig,
        factory: &HttpClientFactory,
    ) -> AppResult<Self> {
        Ok(Self {
            redirect_client: factory.create_redirect_client(&config)?,
            upstream_client: factory.create_upstream_client(&config)?,
            resolver,
            auth_store,
            identity,
            config,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Legacy headers with the cookie from the stored auth record.
    ///
    /// Without a record no cookie is sent; a store error is logged and treated the same.
    async fn upstream_headers(&self) -> HeaderMap {
        let cookie = match self.auth_store.load().await {
            Ok(Some(record)) => Some(record.cookie_header()),
            Ok(None) => {
                debug!("No stored auth record, fetching upstream without cookies");
                None
            }
            Err(e) => {
                warn!("Failed to load auth record: {}", e);
                None
            }
        };
        self.identity.headers(cookie.as_deref())
    }

    /// Resolve `cmd` to its upstream playlist and rewrite it for `proxy_origin`
    pub async fn playlist(
        &self,
        cmd: &str,
        start: Option<i64>,
        proxy_origin: &str,
    ) -> AppResult<String> {
        let stream_url = self.resolver.resolve_stream(cmd, start).await?;
        let headers = self.upstream_headers().await;

        let final_url = follow_redirects(
            &self.redirect_client,
            &stream_url,
            &headers,
            self.config.max_redirects,
        )
        .await?;

        let base = Url::parse(&final_url)
            .map_err(|e| ProxyError::upstream(&final_url, format!("invalid playlist URL: {e}")))?;

        let text = fetch_playlist_text(
            &self.upstream_client,
            &final_url,
            &headers,
            self.config.playlist_timeout,
        )
        .await?;

        let rewritten = PlaylistRewriter::new(proxy_origin)?.rewrite(&text, &base);
        info!(
            "Serving rewritten playlist for {}",
            UrlUtils::obfuscate_credentials(&final_url)
        );
        Ok(rewritten)
    }

    /// Fetch one upstream segment and stream it back
    pub async fn segment(&self, url: &str) -> ProxyResult<Response<Body>> {
        let headers = self.upstream_headers().await;
        stream_segment(
            &self.upstream_client,
            url,
            &headers,
            self.config.segment_timeout,
        )
        .await
    }
}
