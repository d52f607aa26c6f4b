//! HLS playlist rewriting.
//!
//! Every media reference and every `URI="..."` attribute is resolved against
//! the playlist's own URL and replaced by a `/segment?url=<base64>` link on the
//! local proxy, so the player never talks to the upstream origin directly.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use regex::{Captures, Regex};
use tracing::debug;
use url::Url;

use crate::errors::{ProxyError, ProxyResult};

/// Opaque proxy token for a command or URL (standard base64)
pub fn encode_token(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Decode a proxy token back to text.
///
/// Query-string decoding turns `+` into spaces, so spaces are read as `+`.
/// Padding is optional and the URL-safe alphabet is accepted as well.
pub fn decode_token(token: &str) -> ProxyResult<String> {
    let repaired = token.trim().replace(' ', "+");
    if repaired.is_empty() {
        return Err(ProxyError::invalid_token("empty token"));
    }

    let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(repaired.as_bytes()).ok())
        .ok_or_else(|| ProxyError::invalid_token(format!("not base64: {repaired}")))?;

    String::from_utf8(bytes).map_err(|e| ProxyError::invalid_token(e.to_string()))
}

/// Make a playlist reference absolute.
///
/// - `http://` / `https://` references are returned unchanged
/// - `/path` becomes `<scheme>://<host[:port]>/path`
/// - anything else is appended to the directory of `base` (its path up to the last `/`)
pub fn resolve_url(reference: &str, base: &Url) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }

    let origin = origin_of(base);
    if reference.starts_with('/') {
        return format!("{origin}{reference}");
    }

    let path = base.path();
    let directory = match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "/",
    };
    format!("{origin}{directory}{reference}")
}

fn origin_of(base: &Url) -> String {
    let host = base.host_str().unwrap_or_default();
    match base.port() {
        Some(port) => format!("{}://{}:{}", base.scheme(), host, port),
        None => format!("{}://{}", base.scheme(), host),
    }
}

/// `<proxy_origin>/segment?url=<base64(absolute)>`
pub fn segment_url(proxy_origin: &str, absolute: &str) -> String {
    format!(
        "{}/segment?url={}",
        proxy_origin.trim_end_matches('/'),
        encode_token(absolute)
    )
}

/// `<proxy_origin>/playlist/<base64(cmd)>`, with `?utc=` for timeshift playback
pub fn playlist_url(proxy_origin: &str, cmd: &str, start: Option<i64>) -> String {
    let mut url = format!(
        "{}/playlist/{}",
        proxy_origin.trim_end_matches('/'),
        encode_token(cmd)
    );
    if let Some(start) = start {
        url.push_str(&format!("?utc={start}"));
    }
    url
}

/// Rewrites playlists for one proxy origin
pub struct PlaylistRewriter {
    proxy_origin: String,
    uri_attribute: Regex,
}

impl PlaylistRewriter {
    pub fn new(proxy_origin: impl Into<String>) -> ProxyResult<Self> {
        let uri_attribute = Regex::new(r#"URI="([^"]+)""#)
            .map_err(|e| ProxyError::upstream("playlist", e.to_string()))?;
        Ok(Self {
            proxy_origin: proxy_origin.into(),
            uri_attribute,
        })
    }

    /// Rewrite `playlist`, fetched from `base`, line by line.
    ///
    /// Lines are trimmed. Blank lines and comments without `URI=` pass through;
    /// the output is joined with `\n`.
    pub fn rewrite(&self, playlist: &str, base: &Url) -> String {
        let mut rewritten_refs = 0usize;
        let lines: Vec<String> = playlist
            .split('\n')
            .map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return String::new();
                }
                if line.starts_with('#') {
                    if !line.contains("URI=") {
                        return line.to_string();
                    }
                    return self
                        .uri_attribute
                        .replace_all(line, |caps: &Captures| {
                            rewritten_refs += 1;
                            let absolute = resolve_url(&caps[1], base);
                            format!(r#"URI="{}""#, segment_url(&self.proxy_origin, &absolute))
                        })
                        .into_owned();
                }

                rewritten_refs += 1;
                segment_url(&self.proxy_origin, &resolve_url(line, base))
            })
            .collect();

        debug!("Rewrote {} playlist references via {}", rewritten_refs, self.proxy_origin);
        lines.join("\n")
    }
}
