//! Stalker portal source
//!
//! [`PortalClient`] owns the one portal session the application runs with.
//! The streaming proxy consumes it through the [`StreamResolver`] trait and
//! reads cookies from an [`AuthRecord`](crate::models::AuthRecord) snapshot,
//! never from the live session.

pub mod session;
pub mod stalker;
pub mod stream_command;
pub mod traits;

pub use session::{CookieJar, Session};
pub use stalker::{ClientSettingsUpdate, PortalClient};
pub use traits::StreamResolver;
