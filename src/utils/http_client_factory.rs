//! HTTP Client Factory
//!
//! Centralises construction of the reqwest clients used to talk to the portal
//! and to upstream CDNs, so timeouts and redirect policy live in one place.

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, redirect};
use std::time::Duration;
use tracing::debug;

use crate::config::{PortalConfig, ProxyConfig};
use crate::errors::{AppError, AppResult};

/// Header carrying the emulated set-top-box model
pub const X_USER_AGENT: &str = "X-User-Agent";

/// Factory for the crate's HTTP clients
#[derive(Clone, Debug)]
pub struct HttpClientFactory {
    connect_timeout: Duration,
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl HttpClientFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Client for Stalker protocol calls.
    ///
    /// Carries the legacy device headers on every request. Session headers
    /// (Authorization, Cookie) are attached per call. Cookies are tracked by the
    /// session's own jar, never by reqwest.
    pub fn create_portal_client(&self, config: &PortalConfig) -> AppResult<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            X_USER_AGENT,
            HeaderValue::from_str(&config.x_user_agent)
                .map_err(|e| AppError::configuration(format!("Invalid x_user_agent: {e}")))?,
        );

        debug!(
            "Creating portal HTTP client (timeout {:?}, user agent '{}')",
            config.request_timeout, config.user_agent
        );

        Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(self.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build portal HTTP client: {e}")))
    }

    /// Client that never follows redirects, used to walk redirect chains by hand
    pub fn create_redirect_client(&self, config: &ProxyConfig) -> AppResult<Client> {
        Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(self.connect_timeout)
            .timeout(config.redirect_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build redirect client: {e}")))
    }

    /// Client for playlist and segment bodies; per-request timeouts are set by the caller
    pub fn create_upstream_client(&self, config: &ProxyConfig) -> AppResult<Client> {
        Client::builder()
            .redirect(redirect::Policy::limited(config.max_redirects))
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build upstream client: {e}")))
    }
}
