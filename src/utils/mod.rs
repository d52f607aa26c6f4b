//! Utility modules shared across the portal client and the proxy

pub mod http_client_factory;
pub mod url;

pub use http_client_factory::{HttpClientFactory, X_USER_AGENT};
pub use url::UrlUtils;
