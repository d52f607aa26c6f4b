use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod lenient;

use lenient::{deserialize_option_i64, deserialize_option_string, deserialize_string_or_number};

/// HTTP method used for Stalker protocol calls; sticky for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    /// Parse a method name, defaulting to GET for anything that is not POST
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("POST") {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl From<String> for HttpMethod {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl From<HttpMethod> for String {
    fn from(value: HttpMethod) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel category as returned by `itv/get_genres`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    #[serde(deserialize_with = "deserialize_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_i64")]
    pub number: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_i64")]
    pub censored: Option<i64>,
    /// Portal-specific fields passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Live channel record; `cmd` is the opaque handle passed to `create_link`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(deserialize_with = "deserialize_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cmd: String,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub logo: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_i64")]
    pub number: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub tv_genre_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Channel {
    /// Case-insensitive substring match against name, title and alias.
    ///
    /// `needle` must already be lowercase.
    pub fn matches_lowercase(&self, needle: &str) -> bool {
        let fields = [
            Some(self.name.as_str()),
            self.title.as_deref(),
            self.alias.as_deref(),
        ];
        fields
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

/// EPG programme entry (`get_short_epg` / `get_epg_info`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub ch_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub descr: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string")]
    pub time_to: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_i64")]
    pub duration: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_i64")]
    pub start_timestamp: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_i64")]
    pub stop_timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a successful login: the portal's full `get_profile` response, or a
/// minimal stand-in when only the handshake token is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub js: ProfileData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(
        default,
        deserialize_with = "deserialize_option_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_number")]
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileInfo {
    pub const UNKNOWN_ID: &'static str = "unknown";

    /// Profile returned when the portal handed out a token but no usable profile
    pub fn minimal(token: Option<String>) -> Self {
        Self {
            js: ProfileData {
                token,
                id: Self::UNKNOWN_ID.to_string(),
                extra: Map::new(),
            },
            login: Some("Profile".to_string()),
            extra: Map::new(),
        }
    }
}

/// Persisted session snapshot the proxy reads at request time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub mac: String,
    pub portal_url: String,
    /// Cookie header value captured from the portal session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
}

impl AuthRecord {
    /// Cookie header for upstream requests, built from the MAC when none was captured
    pub fn cookie_header(&self) -> String {
        match self.cookies.as_deref().map(str::trim) {
            Some(cookies) if !cookies.is_empty() => cookies.to_string(),
            _ => mac_cookie_header(&self.mac),
        }
    }
}

/// `mac=<urlencoded mac>; stboffset=0`
pub fn mac_cookie_header(mac: &str) -> String {
    format!("mac={}; stboffset=0", urlencoding::encode(mac))
}
