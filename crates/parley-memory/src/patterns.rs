use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use parley_protocol::{
    AssistantError, AssistantResult, Intent, PatternMemoryEntry, Slots, normalize_text,
};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument, warn};

/// Shortest key considered for a substring match. Shorter keys only match
/// exactly so that a learned "call" never captures every sentence with it.
pub const MIN_SUBSTRING_KEY_LEN: usize = 8;

#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<PatternMemoryEntry>>;
    async fn upsert(&self, entry: &PatternMemoryEntry) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryPatternStore {
    entries: Mutex<IndexMap<String, PatternMemoryEntry>>,
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn load_all(&self) -> Result<Vec<PatternMemoryEntry>> {
        Ok(self.entries.lock().values().cloned().collect())
    }

    async fn upsert(&self, entry: &PatternMemoryEntry) -> Result<()> {
        self.entries
            .lock()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }
}

/// Append-only JSONL log; on replay the last record for a key wins and the
/// log is rewritten down to those records.
#[derive(Debug, Clone)]
pub struct FilePatternStore {
    path: PathBuf,
}

impl FilePatternStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            path: root.into().join("patterns.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the log with one record per key, swapped in by rename.
    async fn compact(&self, entries: &[PatternMemoryEntry]) -> Result<()> {
        let staging = self.path.with_extension("jsonl.compact");
        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry).context("failed serializing pattern")?);
            body.push('\n');
        }
        fs::write(&staging, body)
            .await
            .with_context(|| format!("failed writing {staging:?}"))?;
        fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("failed replacing pattern log {:?}", self.path))?;
        Ok(())
    }
}

#[async_trait]
impl PatternStore for FilePatternStore {
    async fn load_all(&self) -> Result<Vec<PatternMemoryEntry>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed opening pattern log {:?}", self.path))?;
        let mut reader = BufReader::new(file).lines();
        let mut latest: IndexMap<String, PatternMemoryEntry> = IndexMap::new();
        let mut records = 0_usize;

        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            records += 1;
            match serde_json::from_str::<PatternMemoryEntry>(&line) {
                Ok(entry) => {
                    latest.insert(entry.key.clone(), entry);
                }
                Err(error) => warn!(%error, path = ?self.path, "skipping corrupt pattern record"),
            }
        }

        let entries: Vec<PatternMemoryEntry> = latest.into_values().collect();
        if records > entries.len() {
            match self.compact(&entries).await {
                Ok(()) => debug!(records, kept = entries.len(), "pattern log compacted"),
                Err(error) => warn!(error = %format!("{error:#}"), "pattern log compaction failed"),
            }
        }
        Ok(entries)
    }

    async fn upsert(&self, entry: &PatternMemoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed opening pattern log {:?}", self.path))?;
        let line = serde_json::to_string(entry)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub entry: PatternMemoryEntry,
    /// `false` when the key matched as a word-aligned substring of the input.
    pub exact: bool,
}

/// Process-wide store of learned corrections.
///
/// Reads take the read lock; reinforcement happens under the write lock so
/// concurrent increments never lose updates. Persistence is serialized by
/// `persist` so the log's last record per key always carries the highest
/// frequency.
pub struct PatternMemory {
    entries: RwLock<HashMap<String, PatternMemoryEntry>>,
    store: Arc<dyn PatternStore>,
    persist: tokio::sync::Mutex<()>,
}

impl PatternMemory {
    pub fn new(store: Arc<dyn PatternStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            persist: tokio::sync::Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryPatternStore::default()))
    }

    /// Builds the memory and replays everything the store holds.
    pub async fn load(store: Arc<dyn PatternStore>) -> Result<Self> {
        let loaded = store.load_all().await?;
        let memory = Self::new(store);
        {
            let mut entries = memory.entries.write();
            for entry in loaded {
                entries.insert(entry.key.clone(), entry);
            }
            info!(entries = entries.len(), "pattern memory loaded");
        }
        Ok(memory)
    }

    /// Exact match on the normalized text, else the best word-aligned
    /// substring match ranked by frequency, then key length, then recency.
    /// A hit refreshes the entry's `last_seen` (frequency is untouched).
    pub fn lookup(&self, text: &str) -> Option<PatternMatch> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return None;
        }

        let mut entries = self.entries.write();
        let (key, exact) = if entries.contains_key(&normalized) {
            (normalized, true)
        } else {
            let padded = format!(" {normalized} ");
            let best = entries
                .values()
                .filter(|entry| {
                    entry.key.len() >= MIN_SUBSTRING_KEY_LEN
                        && padded.contains(&format!(" {} ", entry.key))
                })
                .max_by(|left, right| {
                    left.frequency
                        .cmp(&right.frequency)
                        .then(left.key.len().cmp(&right.key.len()))
                        .then(left.last_seen.cmp(&right.last_seen))
                })?;
            (best.key.clone(), false)
        };

        let entry = entries.get_mut(&key)?;
        entry.last_seen = Utc::now();
        debug!(key = %entry.key, exact, frequency = entry.frequency, "pattern memory hit");
        Some(PatternMatch {
            entry: entry.clone(),
            exact,
        })
    }

    /// Inserts a new entry (frequency 1) or reinforces the existing one, then
    /// persists the resulting snapshot.
    #[instrument(skip(self, intent, slots), fields(intent = %intent))]
    pub async fn upsert(
        &self,
        text: &str,
        intent: Intent,
        slots: Slots,
    ) -> AssistantResult<PatternMemoryEntry> {
        let key = normalize_text(text);
        if key.is_empty() {
            return Err(AssistantError::InvalidInput(
                "correction text is empty".to_owned(),
            ));
        }

        let _persist = self.persist.lock().await;
        let current = self.entries.read().get(&key).cloned();
        let snapshot = match current {
            Some(mut entry) => {
                if entry.reinforce(intent, slots) {
                    info!(key = %key, "pattern superseded by new correction");
                }
                entry
            }
            None => PatternMemoryEntry::new(key.clone(), intent, slots),
        };

        // Only a persisted snapshot becomes visible to lookups.
        self.store
            .upsert(&snapshot)
            .await
            .map_err(|error| AssistantError::Storage(format!("{error:#}")))?;
        self.entries.write().insert(key, snapshot.clone());
        debug!(key = %snapshot.key, frequency = snapshot.frequency, "pattern stored");
        Ok(snapshot)
    }

    pub fn get(&self, text: &str) -> Option<PatternMemoryEntry> {
        self.entries.read().get(&normalize_text(text)).cloned()
    }

    /// All entries, most frequent first.
    pub fn entries(&self) -> Vec<PatternMemoryEntry> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by(|left, right| {
            right
                .frequency
                .cmp(&left.frequency)
                .then_with(|| left.key.cmp(&right.key))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
