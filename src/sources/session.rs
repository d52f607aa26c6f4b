//! Portal session state and its explicit cookie jar.
//!
//! Only the portal client writes to a [`Session`]; everything else (the proxy,
//! the auth store) works from an [`AuthRecord`] snapshot.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::trace;

use crate::models::{AuthRecord, HttpMethod};

/// Name/value cookie store for one portal origin.
///
/// Insertion order is preserved so the emitted Cookie header is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<(String, String)>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.cookies.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.cookies.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.cookies.retain(|(n, _)| n != name);
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Apply every `Set-Cookie` header of a response; returns how many were applied
    pub fn merge_response_headers(&mut self, headers: &HeaderMap) -> usize {
        let mut applied = 0;
        for value in headers.get_all(SET_COOKIE) {
            if let Ok(line) = value.to_str()
                && self.apply_set_cookie(line)
            {
                applied += 1;
            }
        }
        applied
    }

    /// Apply one `Set-Cookie` line.
    ///
    /// A cookie whose `Max-Age` is zero or negative, or whose `Expires` lies
    /// in the past, is removed. `Max-Age` wins when both are present.
    pub fn apply_set_cookie(&mut self, line: &str) -> bool {
        let mut parts = line.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return false;
        };
        let name = name.trim();
        if name.is_empty() {
            return false;
        }

        let mut max_age = None;
        let mut expires = None;
        for (key, attr) in parts.filter_map(|attr| attr.split_once('=')) {
            let key = key.trim();
            if key.eq_ignore_ascii_case("max-age") {
                max_age = attr.trim().parse::<i64>().ok();
            } else if key.eq_ignore_ascii_case("expires") {
                expires = parse_cookie_date(attr.trim());
            }
        }
        let expired = match (max_age, expires) {
            (Some(seconds), _) => seconds <= 0,
            (None, Some(at)) => at <= Utc::now(),
            (None, None) => false,
        };

        if expired {
            trace!("Removing expired cookie {}", name);
            self.remove(name);
        } else {
            self.set(name, value.trim());
        }
        true
    }

    /// `a=1; b=2`, or `None` when the jar is empty
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(n, v)| format!("{n}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// `Expires` dates: RFC 1123 or the legacy dashed Netscape form
fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|at| at.and_utc())
}

/// One authenticated (or authenticating) portal session
#[derive(Debug, Clone)]
pub struct Session {
    pub portal_url: String,
    pub mac: String,
    pub method: HttpMethod,
    pub token: Option<String>,
    /// Cookies the portal set on us
    pub cookies: CookieJar,
    authorized: bool,
}

impl Session {
    pub fn new(portal_url: impl Into<String>, mac: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            portal_url: portal_url.into(),
            mac: mac.into(),
            method,
            token: None,
            cookies: CookieJar::new(),
            authorized: false,
        }
    }

    /// Start sending the device Authorization and Cookie headers
    pub fn authorize(&mut self) {
        self.authorized = true;
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.mac)
    }

    /// Device cookies (`mac`, `stboffset`) followed by whatever the portal set.
    ///
    /// A portal cookie with the same name replaces the device default.
    pub fn cookie_header(&self) -> String {
        let mut jar = CookieJar::new();
        jar.set("mac", urlencoding::encode(&self.mac).into_owned());
        jar.set("stboffset", "0");
        for (name, value) in self.cookies.iter() {
            jar.set(name, value);
        }
        jar.header_value().unwrap_or_default()
    }

    /// Snapshot for the proxy: the portal-set cookies only, as a header string
    pub fn auth_record(&self) -> AuthRecord {
        AuthRecord {
            mac: self.mac.clone(),
            portal_url: self.portal_url.clone(),
            cookies: self.cookies.header_value(),
        }
    }
}
