//! Decisions emitted by the confidence gate.

use crate::intent::{ClassificationResult, Intent, Provenance, Slots};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal state of the gate for a single utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Dispatch now.
    Execute,
    /// Ask the user to confirm before dispatching.
    Confirm,
    /// Ask the user to rephrase or supply missing detail.
    Clarify,
    /// Apply a stored correction, then dispatch.
    Learn,
    /// Classification or extraction failed irrecoverably.
    Error,
}

impl DecisionKind {
    /// Whether this decision leads straight to the dispatcher.
    pub fn dispatches(&self) -> bool {
        matches!(self, Self::Execute | Self::Learn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Confirm => "confirm",
            Self::Clarify => "clarify",
            Self::Learn => "learn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub intent: Intent,
    pub slots: Slots,
    pub confidence: f32,
    pub provenance: Provenance,
    /// Why the gate chose `kind`; meant for logs and tests.
    pub rationale: String,
}

impl Decision {
    pub fn from_result(
        kind: DecisionKind,
        result: &ClassificationResult,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            intent: result.intent.clone(),
            slots: result.slots.clone(),
            confidence: result.confidence,
            provenance: result.provenance,
            rationale: rationale.into(),
        }
    }

    /// Downgrade to `kind` while keeping intent and slots, appending the reason.
    pub fn downgrade(mut self, kind: DecisionKind, reason: impl AsRef<str>) -> Self {
        self.kind = kind;
        self.rationale = format!("{}; {}", self.rationale, reason.as_ref());
        self
    }
}
