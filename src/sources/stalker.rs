//! Stalker portal client implementation
//!
//! Speaks the MAG set-top-box protocol against `<portal>/server/load.php`:
//! a three-step login (landing page, handshake, profile), catalog and EPG
//! lookups, link creation for playback and a periodic keep-alive.
//!
//! Catalog and EPG reads never fail: any transport or decoding problem is
//! logged and turned into an empty list. Login and link creation return errors.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, COOKIE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use super::session::Session;
use super::stream_command::{normalize_stream_link, with_timeshift};
use super::traits::StreamResolver;
use crate::config::PortalConfig;
use crate::errors::{AppResult, AuthFailure, PortalError, PortalResult};
use crate::models::{AuthRecord, Channel, Genre, HttpMethod, ProfileInfo, Program};
use crate::utils::{HttpClientFactory, UrlUtils};

const STB_TYPE: &str = "MAG250";
const SERIAL_NUMBER: &str = "0000000000000";
const FIRMWARE_VERSION: &str = "ImageDescription: 0.2.18-r14-250; ImageDate: Fri Jan 15 15:20:44 EET 2016; PORTAL version: 5.1.0; API Version: JS API version: 328; STB API version: 134;";
const IMAGE_VERSION: &str = "218";
const HW_VERSION: &str = "1.7-BD-00";
const BANNED_MARKER: &str = "BANNED";
const AUTHORIZATION_FAILED: &str = "Authorization failed";
const PROFILE_ATTEMPTS: u32 = 2;
const SHORT_EPG_SIZE: &str = "10";

type Params = Vec<(&'static str, String)>;

fn params<const N: usize>(pairs: [(&'static str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(key, value)| (key, value.to_string()))
        .collect()
}

/// Runtime changes to the portal HTTP client
#[derive(Debug, Clone, Default)]
pub struct ClientSettingsUpdate {
    pub user_agent: Option<String>,
    pub request_timeout: Option<Duration>,
}

/// Client for one Stalker portal session.
///
/// Owned by the composition root and shared by handle (`Arc<PortalClient>`)
/// with the streaming proxy and the keep-alive task.
pub struct PortalClient {
    factory: HttpClientFactory,
    config: RwLock<PortalConfig>,
    http: RwLock<Client>,
    session: RwLock<Option<Session>>,
    channels_cache: Mutex<Option<Arc<Vec<Channel>>>>,
}

impl PortalClient {
    pub fn new(config: PortalConfig) -> AppResult<Self> {
        Self::with_factory(config, HttpClientFactory::default())
    }

    pub fn with_factory(config: PortalConfig, factory: HttpClientFactory) -> AppResult<Self> {
        let http = factory.create_portal_client(&config)?;
        Ok(Self {
            factory,
            config: RwLock::new(config),
            http: RwLock::new(http),
            session: RwLock::new(None),
            channels_cache: Mutex::new(None),
        })
    }

    /// Authenticate against a portal and start a new session.
    ///
    /// Any previous session and the search cache are discarded first. On
    /// failure no session is left behind.
    pub async fn login(
        &self,
        mac: &str,
        portal_url: &str,
        method: HttpMethod,
    ) -> PortalResult<ProfileInfo> {
        let mac = mac.trim().to_string();
        let portal_url = UrlUtils::normalize_portal_url(portal_url);

        if mac.is_empty() {
            return Err(PortalError::InvalidConfig {
                field: "mac".to_string(),
                message: "MAC address is empty".to_string(),
            });
        }
        if !UrlUtils::is_http(&portal_url) {
            return Err(PortalError::InvalidConfig {
                field: "portal_url".to_string(),
                message: format!("expected an http(s) URL, got '{portal_url}'"),
            });
        }
        Url::parse(&portal_url).map_err(|e| PortalError::InvalidConfig {
            field: "portal_url".to_string(),
            message: e.to_string(),
        })?;

        info!(
            "Logging in to {} as {} (method {})",
            portal_url,
            UrlUtils::obfuscate_mac(&mac),
            method
        );

        self.invalidate_channels_cache().await;
        *self.session.write().await = Some(Session::new(portal_url.clone(), mac.clone(), method));

        match self.run_login(&mac).await {
            Ok(profile) => {
                info!("Logged in to {} (profile id {})", portal_url, profile.js.id);
                Ok(profile)
            }
            Err(e) => {
                error!("Login to {} failed: {}", portal_url, e);
                *self.session.write().await = None;
                Err(e)
            }
        }
    }

    async fn run_login(&self, mac: &str) -> PortalResult<ProfileInfo> {
        let landing = self.fetch_landing_page().await?;
        if landing.contains(BANNED_MARKER) {
            return Err(PortalError::Auth(AuthFailure::Banned));
        }

        self.update_session(|session| session.authorize()).await;

        let handshake = self
            .call(params([
                ("type", "stb"),
                ("action", "handshake"),
                ("token", ""),
                ("mac", mac),
                ("stb_type", STB_TYPE),
                ("sn", SERIAL_NUMBER),
                ("ver", FIRMWARE_VERSION),
                ("not_valid_token", "0"),
            ]))
            .await?;

        let token = handshake
            .pointer("/js/token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        match &token {
            Some(token) => {
                debug!("Handshake token received ({} chars)", token.len());
                let token = token.clone();
                self.update_session(move |session| session.token = Some(token))
                    .await;
            }
            None => warn!("Handshake returned no token"),
        }

        let (pacing, retry_delay) = {
            let config = self.config.read().await;
            (config.login_pacing, config.profile_retry_delay)
        };
        tokio::time::sleep(pacing).await;

        let mut profile_params = params([
            ("type", "stb"),
            ("action", "get_profile"),
            ("hd", "1"),
            ("ver", "2"),
            ("num_banks", "2"),
            ("sn", SERIAL_NUMBER),
            ("stb_type", STB_TYPE),
            ("image_version", IMAGE_VERSION),
            ("video_out", "hdmi"),
            ("mac", mac),
            ("hw_version", HW_VERSION),
        ]);
        if let Some(token) = &token {
            profile_params.push(("handshake_token", token.clone()));
        }

        let mut last_error = None;
        for attempt in 1..=PROFILE_ATTEMPTS {
            match self.call(profile_params.clone()).await {
                Ok(body) => return Self::interpret_profile(body, token),
                Err(e) => {
                    warn!("Profile attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < PROFILE_ATTEMPTS {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }

        // Without a profile the handshake token is the only proof of authentication
        match (token, last_error) {
            (Some(token), _) => {
                info!("Profile unavailable, continuing with handshake token only");
                Ok(ProfileInfo::minimal(Some(token)))
            }
            (None, Some(e)) => Err(e),
            (None, None) => Err(PortalError::transport(
                "get_profile",
                "no profile response and no handshake token",
            )),
        }
    }

    fn interpret_profile(body: Value, token: Option<String>) -> PortalResult<ProfileInfo> {
        let has_id = body.pointer("/js/id").is_some_and(is_truthy);
        if !has_id {
            if body.as_str().map(str::trim) == Some(AUTHORIZATION_FAILED) {
                return Err(PortalError::Auth(AuthFailure::AuthorizationFailed));
            }
            debug!("Profile response has no id, using minimal profile");
            return Ok(ProfileInfo::minimal(token));
        }

        match serde_json::from_value::<ProfileInfo>(body) {
            Ok(profile) => Ok(profile),
            Err(e) => {
                warn!("Unreadable profile response ({}), using minimal profile", e);
                Ok(ProfileInfo::minimal(token))
            }
        }
    }

    /// Login step 1: plain GET of the portal root to pick up cookies and detect bans
    async fn fetch_landing_page(&self) -> PortalResult<String> {
        let portal_url = self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.portal_url.clone())
            .ok_or(PortalError::NotLoggedIn)?;

        let client = self.http.read().await.clone();
        let response = client
            .get(&portal_url)
            .send()
            .await
            .map_err(|e| PortalError::transport("landing", e.to_string()))?;

        let headers = response.headers().clone();
        self.update_session(move |session| {
            session.cookies.merge_response_headers(&headers);
        })
        .await;

        let status = response.status();
        if !status.is_success() {
            return Err(PortalError::Http {
                action: "landing".to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| PortalError::transport("landing", e.to_string()))
    }

    /// One `load.php` call with the session's method, headers and cookies.
    ///
    /// Bodies that are not JSON come back as `Value::String`.
    async fn call(&self, params: Params) -> PortalResult<Value> {
        let action = params
            .iter()
            .find(|(key, _)| *key == "action")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        let (endpoint, method, session_headers) = {
            let guard = self.session.read().await;
            let session = guard.as_ref().ok_or(PortalError::NotLoggedIn)?;
            let endpoint = UrlUtils::load_php_url(&session.portal_url).map_err(|e| {
                PortalError::InvalidConfig {
                    field: "portal_url".to_string(),
                    message: e.to_string(),
                }
            })?;
            let headers = session
                .is_authorized()
                .then(|| (session.authorization_header(), session.cookie_header()));
            (endpoint, session.method, headers)
        };

        debug!("Portal call {} via {}", action, method);

        let client = self.http.read().await.clone();
        let mut request = match method {
            HttpMethod::Get => client.get(endpoint).query(&params),
            HttpMethod::Post => client.post(endpoint).form(&params),
        };
        if let Some((authorization, cookie)) = session_headers {
            request = request
                .header(AUTHORIZATION, authorization)
                .header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PortalError::transport(&action, e.to_string()))?;

        let headers = response.headers().clone();
        self.update_session(move |session| {
            session.cookies.merge_response_headers(&headers);
        })
        .await;

        let status = response.status();
        if !status.is_success() {
            return Err(PortalError::Http {
                action,
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| PortalError::transport(&action, e.to_string()))?;

        Ok(match serde_json::from_str::<Value>(&text) {
            Ok(value) => value,
            Err(_) => Value::String(text),
        })
    }

    async fn update_session<F>(&self, apply: F)
    where
        F: FnOnce(&mut Session),
    {
        if let Some(session) = self.session.write().await.as_mut() {
            apply(session);
        }
    }

    /// Channel categories; empty on any failure
    pub async fn get_genres(&self) -> Vec<Genre> {
        match self
            .call(params([
                ("type", "itv"),
                ("action", "get_genres"),
                ("bot_link", "1"),
            ]))
            .await
        {
            Ok(body) => parse_records(body.get("js")),
            Err(e) => {
                warn!("get_genres failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Channels of one genre, ordered by number; empty on any failure
    pub async fn get_channels(&self, genre_id: &str) -> Vec<Channel> {
        match self
            .call(params([
                ("type", "itv"),
                ("action", "get_ordered_list"),
                ("genre", genre_id),
                ("force_ch_link_check", "0"),
                ("fav", "0"),
                ("sortby", "number"),
                ("hd", "1"),
            ]))
            .await
        {
            Ok(body) => parse_records(body.pointer("/js/data")),
            Err(e) => {
                warn!("get_channels for genre {} failed: {}", genre_id, e);
                Vec::new()
            }
        }
    }

    /// Case-insensitive search over name, title and alias.
    ///
    /// The full catalog is fetched once per session and filtered locally.
    pub async fn search_channels(&self, query: &str) -> Vec<Channel> {
        if query.is_empty() {
            return Vec::new();
        }

        let Some(catalog) = self.channel_catalog().await else {
            return Vec::new();
        };

        let needle = query.to_lowercase();
        let matches: Vec<Channel> = catalog
            .iter()
            .filter(|channel| channel.matches_lowercase(&needle))
            .cloned()
            .collect();

        debug!(
            "Search '{}' matched {} of {} cached channels",
            query,
            matches.len(),
            catalog.len()
        );
        matches
    }

    async fn channel_catalog(&self) -> Option<Arc<Vec<Channel>>> {
        let mut cache = self.channels_cache.lock().await;
        if let Some(catalog) = cache.as_ref() {
            return Some(Arc::clone(catalog));
        }

        info!("Fetching full channel list for local search");
        let catalog = Arc::new(self.fetch_full_catalog().await?);
        info!("Cached {} channels", catalog.len());
        *cache = Some(Arc::clone(&catalog));
        Some(catalog)
    }

    async fn fetch_full_catalog(&self) -> Option<Vec<Channel>> {
        match self
            .call(params([
                ("type", "itv"),
                ("action", "get_all_channels"),
                ("force_ch_link_check", "0"),
                ("fav", "0"),
            ]))
            .await
        {
            Ok(body) if body.pointer("/js/data").is_some_and(Value::is_array) => {
                return Some(parse_records(body.pointer("/js/data")));
            }
            Ok(_) => warn!("get_all_channels returned no data, falling back to get_ordered_list"),
            Err(e) => warn!("get_all_channels failed ({}), falling back to get_ordered_list", e),
        }

        match self
            .call(params([
                ("type", "itv"),
                ("action", "get_ordered_list"),
                ("genre", "0"),
                ("force_ch_link_check", "0"),
                ("fav", "0"),
                ("hd", "1"),
            ]))
            .await
        {
            Ok(body) if body.pointer("/js/data").is_some_and(Value::is_array) => {
                Some(parse_records(body.pointer("/js/data")))
            }
            Ok(_) => {
                warn!("Fallback channel list returned no data");
                None
            }
            Err(e) => {
                warn!("Fallback channel list failed: {}", e);
                None
            }
        }
    }

    /// Drop the search catalog so the next search refetches it
    pub async fn invalidate_channels_cache(&self) {
        *self.channels_cache.lock().await = None;
    }

    /// Ask the portal for a playable link for `cmd`.
    ///
    /// With `start` (unix seconds) the request is for timeshift playback and
    /// the returned URL always carries exactly one `utc=` marker.
    pub async fn get_stream(&self, cmd: &str, start: Option<i64>) -> PortalResult<String> {
        let requested = match start {
            Some(start) => with_timeshift(cmd, start),
            None => cmd.to_string(),
        };

        let body = self
            .call(params([
                ("type", "itv"),
                ("action", "create_link"),
                ("cmd", requested.as_str()),
                ("series", ""),
                ("forced_storage", "0"),
                ("disable_ad", "0"),
                ("download", "0"),
                ("force_ch_link_check", "0"),
            ]))
            .await?;

        let link = body
            .pointer("/js/cmd")
            .and_then(Value::as_str)
            .filter(|link| !link.trim().is_empty())
            .ok_or_else(|| PortalError::stream_resolution("create_link response has no js.cmd"))?;

        let url = normalize_stream_link(link, start);
        debug!(
            "Resolved stream link: {}",
            UrlUtils::obfuscate_credentials(&url)
        );
        Ok(url)
    }

    /// Next programmes for one channel; empty on any failure
    pub async fn get_short_epg(&self, channel_id: &str) -> Vec<Program> {
        match self
            .call(params([
                ("type", "itv"),
                ("action", "get_short_epg"),
                ("ch_id", channel_id),
                ("size", SHORT_EPG_SIZE),
            ]))
            .await
        {
            Ok(body) => match body.get("js") {
                Some(Value::Object(js)) => parse_records(js.get("data")),
                other => parse_records(other),
            },
            Err(e) => {
                warn!("get_short_epg for channel {} failed: {}", channel_id, e);
                Vec::new()
            }
        }
    }

    /// Guide for all channels over `period_hours`; empty on any failure.
    ///
    /// Portals answer either with a flat list or with lists keyed by channel id.
    pub async fn get_all_epg(&self, period_hours: u32) -> Vec<Program> {
        let period = period_hours.to_string();
        match self
            .call(params([
                ("type", "itv"),
                ("action", "get_epg_info"),
                ("period", period.as_str()),
            ]))
            .await
        {
            Ok(body) => match body.pointer("/js/data") {
                Some(Value::Object(by_channel)) => {
                    let programs: Vec<Program> = by_channel
                        .values()
                        .flat_map(|entries| match entries {
                            Value::Array(_) => parse_records(Some(entries)),
                            Value::Object(_) => serde_json::from_value(entries.clone())
                                .ok()
                                .into_iter()
                                .collect(),
                            _ => Vec::new(),
                        })
                        .collect();
                    debug!("EPG for {} channels, {} entries", by_channel.len(), programs.len());
                    programs
                }
                data => {
                    let programs = parse_records(data);
                    debug!("EPG with {} entries", programs.len());
                    programs
                }
            },
            Err(e) => {
                warn!("get_epg_info failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Refresh the session so the portal does not expire it.
    ///
    /// Does nothing without a handshake token. Failures are only logged.
    pub async fn keep_alive(&self) {
        let (token, mac) = {
            let guard = self.session.read().await;
            match guard.as_ref() {
                Some(Session {
                    token: Some(token),
                    mac,
                    ..
                }) => (token.clone(), mac.clone()),
                _ => return,
            }
        };

        match self
            .call(params([
                ("type", "stb"),
                ("action", "get_profile"),
                ("handshake_token", token.as_str()),
                ("mac", mac.as_str()),
                ("stb_type", STB_TYPE),
                ("sn", SERIAL_NUMBER),
            ]))
            .await
        {
            Ok(_) => debug!("Keep-alive sent"),
            Err(e) => warn!("Keep-alive failed: {}", e),
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Handshake token of the current session
    pub async fn token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|session| session.token.clone())
    }

    /// `{mac, portal_url, cookies}` snapshot of the current session for the proxy
    pub async fn auth_record(&self) -> Option<AuthRecord> {
        self.session.read().await.as_ref().map(Session::auth_record)
    }

    /// Change the user agent or timeout of subsequent portal calls
    pub async fn update_config(&self, update: ClientSettingsUpdate) -> AppResult<()> {
        let mut config = self.config.write().await;
        let mut next = config.clone();
        if let Some(user_agent) = update.user_agent {
            next.user_agent = user_agent;
        }
        if let Some(timeout) = update.request_timeout {
            next.request_timeout = timeout;
        }

        let client = self.factory.create_portal_client(&next)?;
        *self.http.write().await = client;
        info!(
            "Portal client updated (timeout {:?}, user agent '{}')",
            next.request_timeout, next.user_agent
        );
        *config = next;
        Ok(())
    }

    pub async fn config(&self) -> PortalConfig {
        self.config.read().await.clone()
    }
}

#[async_trait]
impl StreamResolver for PortalClient {
    async fn resolve_stream(&self, cmd: &str, start: Option<i64>) -> PortalResult<String> {
        self.get_stream(cmd, start).await
    }
}

/// Decode an array of records, skipping entries that do not fit the model
fn parse_records<T: DeserializeOwned>(value: Option<&Value>) -> Vec<T> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping unreadable record: {}", e);
                None
            }
        })
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
