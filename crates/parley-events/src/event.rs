use chrono::{DateTime, Utc};
use parley_protocol::{DecisionKind, EventId, Intent, Provenance, SessionId, Slots, UserId};
use serde::{Deserialize, Serialize};

/// What happened at one step of handling an utterance or correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    UtteranceReceived {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    IntentClassified {
        intent: Intent,
        confidence: f32,
        provenance: Provenance,
        ambiguous: bool,
        #[serde(default)]
        slots: Slots,
    },
    DecisionMade {
        kind: DecisionKind,
        policy: String,
        rationale: String,
    },
    ActionDispatched {
        intent: Intent,
        success: bool,
        message: String,
    },
    CorrectionApplied {
        original_text: String,
        intent: Intent,
        always_apply: bool,
        /// Pattern memory frequency after the upsert; absent for
        /// session-scoped corrections.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frequency: Option<u64>,
    },
    SessionCleared,
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UtteranceReceived { .. } => "utterance_received",
            Self::IntentClassified { .. } => "intent_classified",
            Self::DecisionMade { .. } => "decision_made",
            Self::ActionDispatched { .. } => "action_dispatched",
            Self::CorrectionApplied { .. } => "correction_applied",
            Self::SessionCleared => "session_cleared",
        }
    }
}

/// A journaled event. Sequences start at 1 and are dense per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub session_id: SessionId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: PipelineEvent,
}

impl EventRecord {
    pub fn new(session_id: SessionId, sequence: u64, event: PipelineEvent) -> Self {
        Self {
            event_id: EventId::new_uuid(),
            session_id,
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_type_tag() {
        let record = EventRecord::new(
            SessionId::from_string("s"),
            1,
            PipelineEvent::DecisionMade {
                kind: DecisionKind::Confirm,
                policy: "fixed".to_owned(),
                rationale: "confidence 0.85 between 0.81 and 0.91".to_owned(),
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"]["type"], "decision_made");
        assert_eq!(json["event"]["kind"], "confirm");
        assert_eq!(json["session_id"], "s");

        let back: EventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(
            serde_json::to_value(PipelineEvent::SessionCleared).unwrap()["type"],
            PipelineEvent::SessionCleared.name()
        );
    }
}
