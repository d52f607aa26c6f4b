//! Error type definitions for the Stalker proxy
//!
//! This module defines all error types used throughout the crate, providing a
//! hierarchical error system with `thiserror`.

use std::fmt;

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Stalker portal errors
    #[error("Portal error: {0}")]
    Portal(#[from] PortalError),

    /// Streaming proxy errors
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Auth record persistence errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// File system errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reason a login attempt was rejected by the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The portal answered with its ban marker
    Banned,
    /// The profile call explicitly refused the device
    AuthorizationFailed,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::Banned => "banned",
            AuthFailure::AuthorizationFailed => "authorization_failed",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stalker portal client errors
#[derive(Error, Debug)]
pub enum PortalError {
    /// Login-time rejection; no session state may be assumed afterwards
    #[error("Authentication failed: {0}")]
    Auth(AuthFailure),

    /// The portal did not return a usable link for a channel
    #[error("Stream resolution failed: {message}")]
    StreamResolution { message: String },

    /// A protocol call was attempted before a successful login
    #[error("Not logged in to a portal")]
    NotLoggedIn,

    /// Invalid portal URL or MAC address
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    /// Non-success HTTP status from the portal
    #[error("HTTP error: {status} for action {action}")]
    Http { action: String, status: u16 },

    /// Transport failure (timeout, connection refused, body read)
    #[error("Request failed for action {action}: {message}")]
    Transport { action: String, message: String },
}

/// Streaming proxy errors
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Upstream redirect chain exceeded the hop limit
    #[error("Too many redirects: more than {max} hops starting at {url}")]
    TooManyRedirects { max: usize, url: String },

    /// Redirect response without a usable Location header
    #[error("Redirect without Location header from {url}")]
    MissingLocation { url: String },

    /// Transport-level failure fetching a playlist or segment
    #[error("Upstream fetch failed for {url}: {message}")]
    UpstreamFetch { url: String, message: String },

    /// The base64 token in the request path/query could not be decoded
    #[error("Invalid proxy token: {message}")]
    InvalidToken { message: String },

    /// Listener could not be bound or is not running
    #[error("Listener error: {message}")]
    Listener { message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl PortalError {
    /// Create a stream resolution error
    pub fn stream_resolution<S: Into<String>>(message: S) -> Self {
        Self::StreamResolution {
            message: message.into(),
        }
    }

    /// Create a transport error for a portal action
    pub fn transport<A: Into<String>, M: Into<String>>(action: A, message: M) -> Self {
        Self::Transport {
            action: action.into(),
            message: message.into(),
        }
    }

    /// The login failure reason, if this is an auth error
    pub fn auth_failure(&self) -> Option<AuthFailure> {
        match self {
            Self::Auth(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl ProxyError {
    /// Create an upstream fetch error
    pub fn upstream<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::UpstreamFetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an invalid token error
    pub fn invalid_token<S: Into<String>>(message: S) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }
}
