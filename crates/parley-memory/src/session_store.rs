use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use parley_protocol::{SessionContext, SessionId};
use sha2::{Digest, Sha256};
use tokio::fs;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionContext>>;
    async fn save(&self, context: &SessionContext) -> Result<()>;
    async fn delete(&self, session_id: &SessionId) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, SessionContext>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionContext>> {
        Ok(self.sessions.lock().get(session_id).cloned())
    }

    async fn save(&self, context: &SessionContext) -> Result<()> {
        self.sessions
            .lock()
            .insert(context.session_id.clone(), context.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        self.sessions.lock().remove(session_id);
        Ok(())
    }
}

/// One JSON document per session under `<root>/sessions/`, named by the
/// SHA-256 of the session id so arbitrary client ids are safe file names.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join("sessions"),
        }
    }

    fn session_path(&self, session_id: &SessionId) -> PathBuf {
        let digest = Sha256::digest(session_id.as_str().as_bytes());
        self.root.join(format!("{}.json", hex::encode(digest)))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionContext>> {
        let path = self.session_path(session_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let raw = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed reading session file {path:?}"))?;
        let context = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing session file {path:?}"))?;
        Ok(Some(context))
    }

    async fn save(&self, context: &SessionContext) -> Result<()> {
        let path = self.session_path(&context.session_id);
        Self::ensure_parent(&path).await?;

        let payload = serde_json::to_string_pretty(context)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, payload)
            .await
            .with_context(|| format!("failed writing session file {staging:?}"))?;
        fs::rename(&staging, &path)
            .await
            .with_context(|| format!("failed replacing session file {path:?}"))?;
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        let path = self.session_path(session_id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_file(&path)
                .await
                .with_context(|| format!("failed removing session file {path:?}"))?;
        }
        Ok(())
    }
}
