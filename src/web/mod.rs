//! Web layer module
//!
//! The loopback HLS listener players talk to. Routes:
//!
//! - `GET /playlist/{token}[?utc=<start>]`: resolved, fetched and rewritten playlist
//! - `GET /segment?url=<token>`: upstream bytes streamed through
//! - anything else: `404`
//!
//! All responses are CORS-permissive and `OPTIONS` is answered with `200`.

use axum::{Router, http::Method, middleware::from_fn, routing::get};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

pub mod handlers;
pub mod middleware;

use crate::errors::{ProxyError, ProxyResult};
use crate::proxy::ProxyPipeline;
use crate::proxy::playlist::playlist_url;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state for the proxy handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ProxyPipeline>,
    /// `http://127.0.0.1:<port>`, the prefix of every rewritten URL
    pub proxy_origin: Arc<str>,
}

/// Build the proxy router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/playlist/{*token}", get(handlers::playlist::get_playlist))
        .route("/segment", get(handlers::segment::get_segment))
        .fallback(handlers::not_found)
        .layer(from_fn(middleware::options_short_circuit))
        .layer(cors)
        .layer(from_fn(middleware::request_logging_middleware))
        .with_state(state)
}

/// Observable listener state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    Stopped,
    Starting,
    Listening { port: u16 },
}

enum ListenerState {
    Stopped,
    Starting,
    Listening {
        port: u16,
        origin: Arc<str>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    },
}

/// The local proxy listener and its lifecycle.
///
/// `stopped -> starting -> listening -> stopped`. Both [`start`](Self::start)
/// and [`stop`](Self::stop) are idempotent.
pub struct ProxyServer {
    pipeline: Arc<ProxyPipeline>,
    state: Mutex<ListenerState>,
}

impl ProxyServer {
    pub fn new(pipeline: Arc<ProxyPipeline>) -> Self {
        Self {
            pipeline,
            state: Mutex::new(ListenerState::Stopped),
        }
    }

    pub async fn status(&self) -> ProxyStatus {
        match &*self.state.lock().await {
            ListenerState::Stopped => ProxyStatus::Stopped,
            ListenerState::Starting => ProxyStatus::Starting,
            ListenerState::Listening { port, .. } => ProxyStatus::Listening { port: *port },
        }
    }

    /// Port of the running listener
    pub async fn port(&self) -> Option<u16> {
        match self.status().await {
            ProxyStatus::Listening { port } => Some(port),
            _ => None,
        }
    }

    /// Bind and serve; returns the existing port when already listening
    pub async fn start(&self) -> ProxyResult<u16> {
        let mut state = self.state.lock().await;
        if let ListenerState::Listening { port, .. } = &*state {
            return Ok(*port);
        }
        *state = ListenerState::Starting;

        let config = self.pipeline.config();
        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                *state = ListenerState::Stopped;
                return Err(ProxyError::Listener {
                    message: format!("Failed to bind to {bind_addr}: {e}"),
                });
            }
        };
        let local = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                *state = ListenerState::Stopped;
                return Err(ProxyError::Listener {
                    message: e.to_string(),
                });
            }
        };

        let origin: Arc<str> = Arc::from(advertised_origin(local));
        let router = build_router(AppState {
            pipeline: Arc::clone(&self.pipeline),
            proxy_origin: Arc::clone(&origin),
        });

        let shutdown = CancellationToken::new();
        let shutdown_signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
                .await;
            if let Err(e) = served {
                error!("HLS proxy server error: {}", e);
            }
        });

        info!("HLS proxy listening on {}", origin);
        *state = ListenerState::Listening {
            port: local.port(),
            origin,
            shutdown,
            task,
        };
        Ok(local.port())
    }

    /// Close the listener; a no-op when already stopped
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, ListenerState::Stopped);
        let ListenerState::Listening {
            port,
            shutdown,
            task,
            ..
        } = previous
        else {
            return;
        };

        shutdown.cancel();
        let abort = task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("HLS proxy did not drain within {:?}, aborting", SHUTDOWN_GRACE);
            abort.abort();
        }
        info!("HLS proxy on port {} stopped", port);
    }

    /// Player-facing URL for a channel command; starts the listener if needed
    pub async fn stream_url(&self, cmd: &str) -> ProxyResult<String> {
        self.stream_url_at(cmd, None).await
    }

    /// Like [`stream_url`](Self::stream_url), for timeshift playback from `start` (unix seconds)
    pub async fn stream_url_at(&self, cmd: &str, start: Option<i64>) -> ProxyResult<String> {
        self.start().await?;
        match &*self.state.lock().await {
            ListenerState::Listening { origin, .. } => Ok(playlist_url(origin, cmd, start)),
            _ => Err(ProxyError::Listener {
                message: "proxy stopped while building stream URL".to_string(),
            }),
        }
    }
}

/// Loopback address when bound to an unspecified address
fn advertised_origin(local: SocketAddr) -> String {
    let ip = if local.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        local.ip()
    };
    format!("http://{}", SocketAddr::new(ip, local.port()))
}
