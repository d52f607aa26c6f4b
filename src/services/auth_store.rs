//! Persisted `{mac, portal_url, cookies}` record.
//!
//! Written once after login, read by the proxy on every request so it can
//! attach auth headers without running the login again.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::models::AuthRecord;

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn load(&self) -> AppResult<Option<AuthRecord>>;
    async fn save(&self, record: &AuthRecord) -> AppResult<()>;
    async fn clear(&self) -> AppResult<()>;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryAuthStore {
    record: RwLock<Option<AuthRecord>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: AuthRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
        }
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn load(&self) -> AppResult<Option<AuthRecord>> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: &AuthRecord) -> AppResult<()> {
        *self.record.write().await = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        *self.record.write().await = None;
        Ok(())
    }
}

/// JSON file store, written atomically through a temp file
pub struct FileAuthStore {
    path: PathBuf,
}

impl FileAuthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuthStore for FileAuthStore {
    async fn load(&self) -> AppResult<Option<AuthRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No auth record at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            AppError::storage(format!(
                "Corrupt auth record {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn save(&self, record: &AuthRecord) -> AppResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(record)?;
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        info!("Saved auth record to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
