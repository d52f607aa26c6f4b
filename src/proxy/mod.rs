//! Streaming proxy logic
//!
//! Framework-independent pieces of the local HLS relay:
//!
//! - [`playlist`]: proxy tokens, reference resolution and playlist rewriting
//! - [`redirect`]: manual redirect following with a hop limit
//! - [`http_stream`]: upstream fetches with the legacy device identity
//! - [`pipeline`]: the per-request flow the web handlers drive

pub mod http_stream;
pub mod pipeline;
pub mod playlist;
pub mod redirect;

pub use http_stream::UpstreamIdentity;
pub use pipeline::ProxyPipeline;
pub use playlist::{PlaylistRewriter, decode_token, encode_token, resolve_url};
