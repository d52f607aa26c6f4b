/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
use std::time::Duration;

// Portal defaults
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (QtEmbedded; U; Linux; C) AppleWebKit/533.3 (KHTML, like Gecko) MAG200 stbapp ver: 2 rev: 250 Safari/533.3";
pub const DEFAULT_X_USER_AGENT: &str = "Model: MAG250; Link: WiFi";
pub const DEFAULT_PORTAL_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_LOGIN_PACING: Duration = Duration::from_millis(500);
pub const DEFAULT_PROFILE_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

// Proxy listener defaults
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROXY_PORT: u16 = 0; // ephemeral
pub const DEFAULT_PLAYLIST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_REDIRECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

// Storage defaults
pub const DEFAULT_AUTH_FILE: &str = "./data/auth.json";
