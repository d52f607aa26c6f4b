//! Proxy route handlers
//!
//! Handlers never let a failure escape: pipeline errors become `502` and
//! unknown routes `404`, both with plain-text bodies.

pub mod playlist;
pub mod segment;

use axum::http::StatusCode;
use axum::response::Response;

use crate::proxy::http_stream::error_response;

pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

/// First value of `key` in a raw query string, percent-decoded
fn first_query_value(query: Option<&str>, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}
