//! Seams between the portal client and its consumers

use async_trait::async_trait;

use crate::errors::PortalResult;

/// Turns an opaque channel command into a playable upstream URL.
///
/// The streaming proxy only depends on this, so it can be driven by anything
/// that resolves links (the real portal client, or a fixed table in tests).
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Resolve `cmd`, optionally for timeshift playback starting at `start` (unix seconds)
    async fn resolve_stream(&self, cmd: &str, start: Option<i64>) -> PortalResult<String>;
}
