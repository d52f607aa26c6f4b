//! Long-lived services around the portal session

pub mod auth_store;
pub mod keep_alive;

pub use auth_store::{AuthStore, FileAuthStore, MemoryAuthStore};
pub use keep_alive::{KeepAliveHandle, KeepAliveService};
