use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::Response;
use tracing::error;

use super::first_query_value;
use crate::proxy::decode_token;
use crate::proxy::http_stream::error_response;
use crate::utils::UrlUtils;
use crate::web::AppState;

const SEGMENT_FAILURE: &str = "Failed to fetch segment";

/// `GET /segment?url=<token>`: stream one upstream resource through.
///
/// A request without `url` is not a segment request and gets the 404 fallback.
/// When `url` is repeated the first value is used.
pub async fn get_segment(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let Some(token) = first_query_value(query.as_deref(), "url").filter(|token| !token.is_empty())
    else {
        return super::not_found().await;
    };

    let url = match decode_token(&token) {
        Ok(url) => url,
        Err(e) => {
            error!("Segment request with bad token: {}", e);
            return error_response(StatusCode::BAD_GATEWAY, SEGMENT_FAILURE);
        }
    };

    match state.pipeline.segment(&url).await {
        Ok(response) => response,
        Err(e) => {
            error!(
                "Segment error for {}: {}",
                UrlUtils::obfuscate_credentials(&url),
                e
            );
            error_response(StatusCode::BAD_GATEWAY, SEGMENT_FAILURE)
        }
    }
}
