//! Centralized error handling for the Stalker proxy
//!
//! The taxonomy mirrors the two components of the crate:
//!
//! - **Portal Errors**: login failures (ban, rejected authorization), stream
//!   link resolution failures and transport problems talking to the middleware
//! - **Proxy Errors**: redirect chains that never terminate, upstream playlist or
//!   segment fetch failures, undecodable proxy tokens and listener lifecycle issues
//!
//! Catalog and EPG lookups never surface errors; they degrade to empty results
//! inside [`crate::sources::PortalClient`].
//!
//! # Usage
//!
//! ```rust
//! use stalker_proxy::errors::{AppError, AppResult};
//!
//! async fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for portal client Results
pub type PortalResult<T> = Result<T, PortalError>;

/// Convenience type alias for streaming proxy Results
pub type ProxyResult<T> = Result<T, ProxyError>;
