use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use parley_protocol::{
    AssistantError, AssistantResult, CorrectionRecord, PendingAction, Role, SessionContext,
    SessionId, Turn, UserId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, instrument};

use crate::session_store::{InMemorySessionStore, SessionStore};
use crate::working::observe_turn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub history_cap: usize,
    pub summary_max_chars: usize,
    pub recent_topics_cap: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_cap: 10,
            summary_max_chars: 600,
            recent_topics_cap: 5,
        }
    }
}

/// Owns every [`SessionContext`]; callers only ever see snapshots.
///
/// The pipeline takes [`ContextManager::lock`] for the whole utterance, so
/// the read-modify-write sequence on a session is exclusive while different
/// sessions proceed in parallel.
pub struct ContextManager {
    sessions: RwLock<HashMap<SessionId, SessionContext>>,
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
    store: Arc<dyn SessionStore>,
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(store: Arc<dyn SessionStore>, config: ContextConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            store,
            config,
        }
    }

    pub fn in_memory(config: ContextConfig) -> Self {
        Self::new(Arc::new(InMemorySessionStore::default()), config)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.locks.lock();
        guard
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Exclusive guard for one session, held across the whole pipeline run.
    pub async fn lock(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        self.lock_for(session_id).lock_owned().await
    }

    /// Cached context, else the persisted one, else a fresh (unsaved) one.
    #[instrument(skip(self, user_id), fields(session = %session_id))]
    pub async fn get_or_create(
        &self,
        session_id: &SessionId,
        user_id: Option<&UserId>,
    ) -> AssistantResult<SessionContext> {
        let context = match self.get(session_id).await? {
            Some(context) => context,
            None => {
                debug!("creating session");
                let context = SessionContext::new(session_id.clone(), user_id.cloned());
                let mut sessions = self.sessions.write();
                let cached = sessions.entry(session_id.clone()).or_insert(context);
                return Ok(cached.clone());
            }
        };

        if context.user_id.is_none() && user_id.is_some() {
            return self.update(session_id, |context| context.user_id = user_id.cloned());
        }
        Ok(context)
    }

    /// Snapshot of a session, loading it from the store on a cache miss.
    pub async fn get(&self, session_id: &SessionId) -> AssistantResult<Option<SessionContext>> {
        let cached = self.sessions.read().get(session_id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let loaded = self
            .store
            .load(session_id)
            .await
            .map_err(|error| AssistantError::Storage(format!("{error:#}")))?;
        let Some(context) = loaded else {
            return Ok(None);
        };
        debug!(session = %session_id, turns = context.turns.len(), "session reloaded");
        let mut sessions = self.sessions.write();
        let cached = sessions.entry(session_id.clone()).or_insert(context);
        Ok(Some(cached.clone()))
    }

    /// Appends a turn, evicting the oldest beyond the history cap and folding
    /// them into the rolling summary. Returns the evicted turns.
    pub fn append(&self, session_id: &SessionId, turn: Turn) -> AssistantResult<Vec<Turn>> {
        let cap = self.config.history_cap;
        let topics_cap = self.config.recent_topics_cap;
        let summary_cap = self.config.summary_max_chars;
        let mut evicted = Vec::new();
        self.update(session_id, |context| {
            observe_turn(&mut context.working_memory, &turn, topics_cap);
            evicted = context.push_turn(turn, cap);
            if !evicted.is_empty() {
                context.summary = Some(fold_summary(
                    context.summary.take(),
                    &evicted,
                    summary_cap,
                ));
            }
        })?;
        Ok(evicted)
    }

    #[instrument(skip(self), fields(session = %session_id))]
    pub async fn save(&self, session_id: &SessionId) -> AssistantResult<()> {
        let snapshot = self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AssistantError::SessionNotFound(session_id.to_string()))?;
        self.store
            .save(&snapshot)
            .await
            .map_err(|error| AssistantError::Storage(format!("{error:#}")))
    }

    /// Drops a session from memory and the store. Returns whether it existed.
    #[instrument(skip(self), fields(session = %session_id))]
    pub async fn clear(&self, session_id: &SessionId) -> AssistantResult<bool> {
        let existed = self.get(session_id).await?.is_some();
        self.sessions.write().remove(session_id);
        self.store
            .delete(session_id)
            .await
            .map_err(|error| AssistantError::Storage(format!("{error:#}")))?;
        let mut locks = self.locks.lock();
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
        Ok(existed)
    }

    pub fn set_pending(
        &self,
        session_id: &SessionId,
        pending: Option<PendingAction>,
    ) -> AssistantResult<()> {
        self.update(session_id, |context| context.pending = pending)
            .map(|_| ())
    }

    /// Stores a session-scoped correction, replacing any earlier one for the
    /// same normalized text.
    pub fn record_correction(
        &self,
        session_id: &SessionId,
        correction: CorrectionRecord,
    ) -> AssistantResult<()> {
        self.update(session_id, |context| {
            let key = correction.normalized_key();
            context
                .corrections
                .retain(|existing| existing.normalized_key() != key);
            context.corrections.push(correction);
        })
        .map(|_| ())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn update(
        &self,
        session_id: &SessionId,
        apply: impl FnOnce(&mut SessionContext),
    ) -> AssistantResult<SessionContext> {
        let mut sessions = self.sessions.write();
        let context = sessions
            .get_mut(session_id)
            .ok_or_else(|| AssistantError::SessionNotFound(session_id.to_string()))?;
        apply(context);
        context.last_updated = chrono::Utc::now();
        Ok(context.clone())
    }
}

fn fold_summary(previous: Option<String>, evicted: &[Turn], max_chars: usize) -> String {
    let mut summary = previous.unwrap_or_default();
    for turn in evicted {
        let speaker = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content: String = turn.content.chars().take(80).collect();
        if !summary.is_empty() {
            summary.push_str(" | ");
        }
        summary.push_str(speaker);
        summary.push_str(": ");
        summary.push_str(content.trim());
    }

    let length = summary.chars().count();
    if length > max_chars {
        summary = summary.chars().skip(length - max_chars).collect();
    }
    summary
}
