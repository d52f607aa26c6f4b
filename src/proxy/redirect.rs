//! Manual redirect following for upstream stream links.
//!
//! reqwest's automatic redirects are disabled on the redirect client so every
//! hop is inspected here: 2xx ends the chain, 301/302 with a `Location` is one
//! more hop, anything else is fatal.

use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::errors::{ProxyError, ProxyResult};
use crate::utils::UrlUtils;

/// Follow `start` through at most `max_hops` redirects and return the final URL
pub async fn follow_redirects(
    client: &Client,
    start: &str,
    headers: &HeaderMap,
    max_hops: usize,
) -> ProxyResult<String> {
    let mut current = start.to_string();
    let mut hops = 0usize;

    loop {
        let response = client
            .get(&current)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| ProxyError::upstream(&current, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            if hops > 0 {
                debug!(
                    "Redirect chain resolved after {} hops: {}",
                    hops,
                    UrlUtils::obfuscate_credentials(&current)
                );
            }
            return Ok(current);
        }

        if status != StatusCode::MOVED_PERMANENTLY && status != StatusCode::FOUND {
            return Err(ProxyError::upstream(
                &current,
                format!("unexpected status {status}"),
            ));
        }

        if hops >= max_hops {
            return Err(ProxyError::TooManyRedirects {
                max: max_hops,
                url: start.to_string(),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ProxyError::MissingLocation {
                url: current.clone(),
            })?;

        let next = resolve_location(&current, location)?;
        hops += 1;
        debug!(
            "Redirect hop {} ({}) -> {}",
            hops,
            status.as_u16(),
            UrlUtils::obfuscate_credentials(&next)
        );
        current = next;
    }
}

/// Absolute `Location` values are used as-is; relative ones are joined onto `current`
fn resolve_location(current: &str, location: &str) -> ProxyResult<String> {
    if location.starts_with("http") {
        return Ok(location.to_string());
    }

    Url::parse(current)
        .and_then(|base| base.join(location))
        .map(String::from)
        .map_err(|e| ProxyError::upstream(current, format!("bad redirect target '{location}': {e}")))
}
