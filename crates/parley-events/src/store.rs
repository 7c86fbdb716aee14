use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use parley_protocol::SessionId;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, instrument, warn};

use crate::event::EventRecord;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Rejects any record whose sequence is not exactly latest + 1.
    async fn append(&self, record: &EventRecord) -> Result<()>;
    async fn read_from(
        &self,
        session_id: &SessionId,
        from_sequence: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>>;
    async fn latest_sequence(&self, session_id: &SessionId) -> Result<u64>;
}

fn check_sequence(record: &EventRecord, latest: u64) -> Result<()> {
    let expected_sequence = latest.saturating_add(1);
    if record.sequence != expected_sequence {
        warn!(
            expected_sequence,
            actual_sequence = record.sequence,
            "sequence conflict while appending event"
        );
        bail!(
            "sequence conflict for session {}: expected {}, got {}",
            record.session_id,
            expected_sequence,
            record.sequence
        );
    }
    Ok(())
}

/// One JSONL file per session under `root/events/`.
#[derive(Debug)]
pub struct FileEventStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
    sequence_cache: Mutex<HashMap<SessionId, u64>>,
}

impl FileEventStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: Mutex::new(HashMap::new()),
            sequence_cache: Mutex::new(HashMap::new()),
        }
    }

    fn file_path(&self, session_id: &SessionId) -> PathBuf {
        let digest = Sha256::digest(session_id.as_str().as_bytes());
        self.root
            .join("events")
            .join(format!("{}.jsonl", hex::encode(digest)))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create events dir {parent:?}"))?;
        }
        Ok(())
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.write_locks.lock();
        guard
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn scan_latest_sequence(path: &Path) -> Result<u64> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(0);
        }

        let file = OpenOptions::new().read(true).open(path).await?;
        let mut reader = BufReader::new(file).lines();
        let mut latest = 0_u64;

        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: EventRecord = serde_json::from_str(&line)
                .with_context(|| format!("failed parsing event line in {path:?}"))?;
            latest = latest.max(record.sequence);
        }
        Ok(latest)
    }

    fn cached_latest_sequence(&self, session_id: &SessionId) -> Option<u64> {
        self.sequence_cache.lock().get(session_id).copied()
    }

    fn update_cached_sequence(&self, session_id: &SessionId, latest: u64) {
        self.sequence_cache.lock().insert(session_id.clone(), latest);
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    #[instrument(
        skip(self, record),
        fields(
            session_id = %record.session_id,
            event = record.event.name(),
            sequence = record.sequence
        )
    )]
    async fn append(&self, record: &EventRecord) -> Result<()> {
        let path = self.file_path(&record.session_id);
        Self::ensure_parent(&path).await?;

        let lock = self.lock_for(&record.session_id);
        let _guard = lock.lock().await;

        let latest = match self.cached_latest_sequence(&record.session_id) {
            Some(latest) => latest,
            None => {
                let latest = Self::scan_latest_sequence(&path).await?;
                self.update_cached_sequence(&record.session_id, latest);
                latest
            }
        };
        check_sequence(record, latest)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed opening event log {path:?}"))?;

        let line = serde_json::to_string(record).context("failed serializing event")?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        self.update_cached_sequence(&record.session_id, record.sequence);
        debug!("event appended to journal");
        Ok(())
    }

    #[instrument(skip(self, session_id), fields(session_id = %session_id, from_sequence, limit))]
    async fn read_from(
        &self,
        session_id: &SessionId,
        from_sequence: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let path = self.file_path(session_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let file = OpenOptions::new().read(true).open(&path).await?;
        let mut reader = BufReader::new(file).lines();
        let mut out = Vec::new();

        while out.len() < limit
            && let Some(line) = reader.next_line().await?
        {
            if line.trim().is_empty() {
                continue;
            }
            let record: EventRecord = serde_json::from_str(&line)
                .with_context(|| format!("failed parsing event line in {path:?}"))?;
            if record.sequence >= from_sequence {
                out.push(record);
            }
        }
        debug!(count = out.len(), "events loaded from journal");
        Ok(out)
    }

    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    async fn latest_sequence(&self, session_id: &SessionId) -> Result<u64> {
        if let Some(latest) = self.cached_latest_sequence(session_id) {
            return Ok(latest);
        }

        let path = self.file_path(session_id);
        let latest = Self::scan_latest_sequence(&path).await?;
        self.update_cached_sequence(session_id, latest);
        debug!(latest, "latest sequence resolved");
        Ok(latest)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    sessions: Mutex<HashMap<SessionId, Vec<EventRecord>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, record: &EventRecord) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let log = sessions.entry(record.session_id.clone()).or_default();
        check_sequence(record, log.last().map_or(0, |last| last.sequence))?;
        log.push(record.clone());
        Ok(())
    }

    async fn read_from(
        &self,
        session_id: &SessionId,
        from_sequence: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        Ok(self
            .sessions
            .lock()
            .get(session_id)
            .map(|log| {
                log.iter()
                    .filter(|record| record.sequence >= from_sequence)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_sequence(&self, session_id: &SessionId) -> Result<u64> {
        Ok(self
            .sessions
            .lock()
            .get(session_id)
            .and_then(|log| log.last())
            .map_or(0, |last| last.sequence))
    }
}
