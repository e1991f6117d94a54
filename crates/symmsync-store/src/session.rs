//! File-backed session storage for local development.
//!
//! One JSON document per handle, named `session_<handle>.json` with dots and
//! `@` flattened to underscores. The document shape matches [`StoredSession`]'s
//! serde representation, which uses the wire token field names.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use symmsync_core::SyncError;

use crate::models::StoredSession;
use crate::SessionStore;

/// Per-handle JSON files under a base directory.
pub struct FileSessionStore {
    base_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, handle: &str) -> PathBuf {
        let name = handle.replace(['.', '@'], "_");
        self.base_dir.join(format!("session_{name}.json"))
    }

    async fn read(path: &Path) -> Result<Option<StoredSession>, SyncError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    // A corrupt session file just forces a fresh login.
                    warn!(path = %path.display(), error = %e, "discarding unreadable session file");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::Storage(format!("reading {}: {e}", path.display()))),
        }
    }

    async fn write(path: &Path, session: &StoredSession) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Storage(format!("creating {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| SyncError::Storage(format!("serializing session: {e}")))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| SyncError::Storage(format!("writing {}: {e}", path.display())))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, handle: &str) -> Result<Option<StoredSession>, SyncError> {
        Self::read(&self.path_for(handle)).await
    }

    async fn save(&self, session: &StoredSession) -> Result<(), SyncError> {
        Self::write(&self.path_for(&session.handle), session).await
    }

    async fn update_access(&self, handle: &str, access_jwt: &str) -> Result<(), SyncError> {
        let path = self.path_for(handle);
        let Some(mut session) = Self::read(&path).await? else {
            return Ok(());
        };
        session.access_jwt = access_jwt.to_string();
        session.access_date = Utc::now();
        Self::write(&path, &session).await
    }
}
