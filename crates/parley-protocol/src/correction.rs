//! User corrections and the pattern memory entries they promote into.

use crate::intent::{Intent, Slots};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical form used as a pattern memory key: lower-case, punctuation
/// dropped (apostrophes kept), whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() || c == '\'' {
            cleaned.extend(c.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub original_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_intent: Option<Intent>,
    #[serde(default)]
    pub predicted_slots: Slots,
    pub corrected_intent: Intent,
    #[serde(default)]
    pub corrected_slots: Slots,
    /// Promote into process-wide pattern memory instead of this session only.
    #[serde(default)]
    pub always_apply: bool,
    pub recorded_at: DateTime<Utc>,
}

impl CorrectionRecord {
    pub fn new(
        original_text: impl Into<String>,
        corrected_intent: Intent,
        corrected_slots: Slots,
        always_apply: bool,
    ) -> Self {
        Self {
            original_text: original_text.into(),
            predicted_intent: None,
            predicted_slots: Slots::new(),
            corrected_intent,
            corrected_slots,
            always_apply,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_prediction(mut self, intent: Intent, slots: Slots) -> Self {
        self.predicted_intent = Some(intent);
        self.predicted_slots = slots;
        self
    }

    pub fn normalized_key(&self) -> String {
        normalize_text(&self.original_text)
    }
}

/// A learned (input → corrected intent/slots) pair.
///
/// `frequency` never decreases while the entry exists: a repeated correction
/// reinforces it, a differing correction for the same key supersedes the
/// payload and still counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMemoryEntry {
    pub key: String,
    pub intent: Intent,
    #[serde(default)]
    pub slots: Slots,
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl PatternMemoryEntry {
    pub fn new(key: impl Into<String>, intent: Intent, slots: Slots) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            intent,
            slots,
            frequency: 1,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Record another correction for this key. Returns `true` when the
    /// stored payload changed (supersede) rather than just being reinforced.
    pub fn reinforce(&mut self, intent: Intent, slots: Slots) -> bool {
        let superseded = self.intent != intent || self.slots != slots;
        if superseded {
            self.intent = intent;
            self.slots = slots;
        }
        self.frequency = self.frequency.saturating_add(1);
        self.last_seen = Utc::now();
        superseded
    }
}
