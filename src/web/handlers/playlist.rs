use axum::extract::rejection::PathRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::Response;
use tracing::{debug, error};

use super::first_query_value;
use crate::proxy::decode_token;
use crate::proxy::http_stream::{error_response, playlist_response};
use crate::web::AppState;

const PLAYLIST_FAILURE: &str = "Failed to fetch playlist";

/// `GET /playlist/{token}[?utc=<unix seconds>]`: resolve the channel command
/// and serve a rewritten playlist.
///
/// Failures never reach the client in detail; they are logged and answered
/// with a fixed `502` body.
pub async fn get_playlist(
    State(state): State<AppState>,
    token: Result<Path<String>, PathRejection>,
    RawQuery(query): RawQuery,
) -> Response {
    let cmd = match token {
        Ok(Path(token)) => match decode_token(&token) {
            Ok(cmd) => cmd,
            Err(e) => {
                error!("Playlist request with bad token: {}", e);
                return error_response(StatusCode::BAD_GATEWAY, PLAYLIST_FAILURE);
            }
        },
        Err(rejection) => {
            error!("Playlist request with unreadable token: {}", rejection.body_text());
            return error_response(StatusCode::BAD_GATEWAY, PLAYLIST_FAILURE);
        }
    };

    // Unparseable or repeated `utc` values never fail the request; the first one wins
    let start = first_query_value(query.as_deref(), "utc")
        .and_then(|utc| utc.trim().parse::<i64>().ok());
    debug!(
        "Playlist requested for command {}{}",
        cmd.chars().take(40).collect::<String>(),
        start.map(|s| format!(" at utc={s}")).unwrap_or_default()
    );

    match state
        .pipeline
        .playlist(&cmd, start, &state.proxy_origin)
        .await
    {
        Ok(playlist) => playlist_response(playlist),
        Err(e) => {
            error!("Playlist error: {}", e);
            error_response(StatusCode::BAD_GATEWAY, PLAYLIST_FAILURE)
        }
    }
}
