use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use crate::errors::{AppError, AppResult};
use crate::models::HttpMethod;
use defaults::*;

/// Environment prefix for configuration overrides, e.g. `STALKER_PROXY_PORTAL__MAC`
pub const ENV_PREFIX: &str = "STALKER_PROXY_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Stalker middleware connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal base URL, e.g. `http://portal.example/c/`
    #[serde(default)]
    pub url: String,
    /// Device MAC address presented to the portal
    #[serde(default)]
    pub mac: String,
    /// HTTP method used for every protocol call once logged in
    #[serde(default)]
    pub method: HttpMethod,
    /// Legacy set-top-box User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Device identification header (`X-User-Agent`)
    #[serde(default = "default_x_user_agent")]
    pub x_user_agent: String,
    #[serde(default = "default_portal_timeout", with = "duration_serde::duration")]
    pub request_timeout: Duration,
    /// Pause between handshake and profile fetch
    #[serde(default = "default_login_pacing", with = "duration_serde::duration")]
    pub login_pacing: Duration,
    #[serde(default = "default_profile_retry_delay", with = "duration_serde::duration")]
    pub profile_retry_delay: Duration,
    #[serde(default = "default_keep_alive_interval", with = "duration_serde::duration")]
    pub keep_alive_interval: Duration,
}

/// Local HLS proxy listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_host")]
    pub host: String,
    /// 0 picks an ephemeral port
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default = "default_playlist_timeout", with = "duration_serde::duration")]
    pub playlist_timeout: Duration,
    #[serde(default = "default_segment_timeout", with = "duration_serde::duration")]
    pub segment_timeout: Duration,
    /// Per-hop timeout while following upstream redirects
    #[serde(default = "default_redirect_timeout", with = "duration_serde::duration")]
    pub redirect_timeout: Duration,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the persisted `{mac, portal_url, cookies}` record
    #[serde(default = "default_auth_file")]
    pub auth_file: PathBuf,
}

// Portal defaults
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_x_user_agent() -> String {
    DEFAULT_X_USER_AGENT.to_string()
}

fn default_portal_timeout() -> Duration {
    DEFAULT_PORTAL_TIMEOUT
}

fn default_login_pacing() -> Duration {
    DEFAULT_LOGIN_PACING
}

fn default_profile_retry_delay() -> Duration {
    DEFAULT_PROFILE_RETRY_DELAY
}

fn default_keep_alive_interval() -> Duration {
    DEFAULT_KEEP_ALIVE_INTERVAL
}

// Proxy defaults
fn default_proxy_host() -> String {
    DEFAULT_PROXY_HOST.to_string()
}

fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

fn default_playlist_timeout() -> Duration {
    DEFAULT_PLAYLIST_TIMEOUT
}

fn default_segment_timeout() -> Duration {
    DEFAULT_SEGMENT_TIMEOUT
}

fn default_redirect_timeout() -> Duration {
    DEFAULT_REDIRECT_TIMEOUT
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

// Storage defaults
fn default_auth_file() -> PathBuf {
    PathBuf::from(DEFAULT_AUTH_FILE)
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            mac: String::new(),
            method: HttpMethod::default(),
            user_agent: default_user_agent(),
            x_user_agent: default_x_user_agent(),
            request_timeout: default_portal_timeout(),
            login_pacing: default_login_pacing(),
            profile_retry_delay: default_profile_retry_delay(),
            keep_alive_interval: default_keep_alive_interval(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            port: default_proxy_port(),
            playlist_timeout: default_playlist_timeout(),
            segment_timeout: default_segment_timeout(),
            redirect_timeout: default_redirect_timeout(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            auth_file: default_auth_file(),
        }
    }
}

impl Config {
    /// Layer defaults, the TOML file and `STALKER_PROXY_*` environment overrides.
    ///
    /// A missing file is created with the default configuration first.
    pub fn load_from_file(config_file: &str) -> AppResult<Self> {
        if !Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())
                .map_err(|e| AppError::configuration(format!("Failed to render defaults: {e}")))?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
        }

        Self::figment(config_file)
            .extract()
            .map_err(|e| AppError::configuration(e.to_string()))
    }

    fn figment(config_file: &str) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
