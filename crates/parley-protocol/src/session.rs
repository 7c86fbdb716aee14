//! Session context: bounded turn history plus derived working memory.

use std::collections::VecDeque;

use crate::correction::CorrectionRecord;
use crate::decision::{Decision, DecisionKind};
use crate::ids::{SessionId, UserId};
use crate::intent::{ClassificationResult, Intent, Provenance, Slots};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionKind>,
}

/// One message in the conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: TurnMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.metadata.as_ref().and_then(|meta| meta.intent.as_ref())
    }
}

/// Best-effort summary of what the session is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingMemory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default)]
    pub pending_actions: Vec<String>,
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub recent_topics: Vec<String>,
}

/// An action awaiting the user's yes/no after a `confirm` decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub intent: Intent,
    pub slots: Slots,
    pub confidence: f32,
    pub provenance: Provenance,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn from_decision(decision: &Decision, prompt: impl Into<String>) -> Self {
        Self {
            intent: decision.intent.clone(),
            slots: decision.slots.clone(),
            confidence: decision.confidence,
            provenance: decision.provenance,
            prompt: prompt.into(),
            created_at: Utc::now(),
        }
    }

    /// The confirmed action as an `execute` decision.
    pub fn into_decision(self, rationale: impl Into<String>) -> Decision {
        let result = ClassificationResult::new(self.intent, self.confidence, self.provenance)
            .with_slots(self.slots);
        Decision::from_result(DecisionKind::Execute, &result, rationale)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub turns: VecDeque<Turn>,
    #[serde(default)]
    pub working_memory: WorkingMemory,
    /// Corrections that apply to this session only.
    #[serde(default)]
    pub corrections: Vec<CorrectionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingAction>,
    /// Rolling summary of turns evicted from the history window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: SessionId, user_id: Option<UserId>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            turns: VecDeque::new(),
            working_memory: WorkingMemory::default(),
            corrections: Vec::new(),
            pending: None,
            summary: None,
            created_at: now,
            last_updated: now,
        }
    }

    /// Append a turn, evicting from the front until at most `cap` remain.
    /// Returns the evicted turns, oldest first.
    pub fn push_turn(&mut self, turn: Turn, cap: usize) -> Vec<Turn> {
        self.turns.push_back(turn);
        let mut evicted = Vec::new();
        while self.turns.len() > cap.max(1) {
            if let Some(oldest) = self.turns.pop_front() {
                evicted.push(oldest);
            }
        }
        self.last_updated = Utc::now();
        evicted
    }

    pub fn last_user_turn(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.role == Role::User)
    }

    /// Most recent session-scoped correction recorded for `normalized` text.
    pub fn correction_for(&self, normalized: &str) -> Option<&CorrectionRecord> {
        self.corrections
            .iter()
            .rev()
            .find(|record| record.normalized_key() == normalized)
    }
}
