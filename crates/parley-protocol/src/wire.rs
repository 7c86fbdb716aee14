//! Inbound and outbound wire shapes (camelCase JSON).

use crate::action::ActionResult;
use crate::correction::CorrectionRecord;
use crate::decision::{Decision, DecisionKind};
use crate::ids::{SessionId, UserId};
use crate::intent::{Intent, Slots};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable pipeline input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub received_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            user_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn by_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistRequest {
    pub text: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl From<AssistRequest> for Utterance {
    fn from(request: AssistRequest) -> Self {
        let mut utterance = Utterance::new(request.text)
            .in_session(SessionId::or_generate(request.session_id.as_deref()));
        if let Some(user_id) = request.user_id.filter(|id| !id.trim().is_empty()) {
            utterance = utterance.by_user(UserId::from_string(user_id));
        }
        utterance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistResponse {
    pub success: bool,
    pub decision: DecisionKind,
    pub intent: Intent,
    pub confidence: f32,
    pub slots: Slots,
    pub message: String,
    pub spoken_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
    pub session_id: SessionId,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl AssistResponse {
    pub fn from_parts(session_id: SessionId, decision: &Decision, action: ActionResult) -> Self {
        Self {
            success: action.success,
            decision: decision.kind,
            intent: decision.intent.clone(),
            confidence: decision.confidence,
            slots: decision.slots.clone(),
            message: action.message,
            spoken_response: action.spoken_response,
            follow_up: action.follow_up,
            session_id,
            rationale: decision.rationale.clone(),
            data: action.data,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRequest {
    pub original_text: String,
    #[serde(default)]
    pub predicted_intent: Option<Intent>,
    #[serde(default)]
    pub predicted_slots: Slots,
    pub corrected_intent: Intent,
    #[serde(default)]
    pub corrected_slots: Slots,
    #[serde(default)]
    pub always_apply: bool,
}

impl From<CorrectionRequest> for CorrectionRecord {
    fn from(request: CorrectionRequest) -> Self {
        let mut record = CorrectionRecord::new(
            request.original_text,
            request.corrected_intent,
            request.corrected_slots,
            request.always_apply,
        );
        if let Some(intent) = request.predicted_intent {
            record = record.with_prediction(intent, request.predicted_slots);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{ClassificationResult, Provenance};
    use serde_json::json;

    #[test]
    fn assist_request_accepts_camel_case_and_generates_session() {
        let request: AssistRequest =
            serde_json::from_value(json!({ "text": "note buy milk", "userId": "u-7" })).unwrap();
        let utterance = Utterance::from(request);
        assert!(utterance.session_id.is_some());
        assert_eq!(utterance.user_id.as_ref().map(UserId::as_str), Some("u-7"));
    }

    #[test]
    fn assist_response_uses_camel_case_keys() {
        let result = ClassificationResult::new(Intent::new("create_note"), 0.95, Provenance::Rule);
        let decision = Decision::from_result(DecisionKind::Execute, &result, "high confidence");
        let response = AssistResponse::from_parts(
            SessionId::from_string("s"),
            &decision,
            ActionResult::succeeded("Saved.").with_follow_up("Anything else?"),
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["decision"], "execute");
        assert_eq!(value["spokenResponse"], "Saved.");
        assert_eq!(value["followUp"], "Anything else?");
        assert_eq!(value["sessionId"], "s");
    }

    #[test]
    fn correction_request_maps_prediction() {
        let request: CorrectionRequest = serde_json::from_value(json!({
            "originalText": "weekly sync tomorrow",
            "predictedIntent": "create_note",
            "correctedIntent": "create_event",
            "correctedSlots": { "recurring": "weekly" },
            "alwaysApply": true
        }))
        .unwrap();
        let record = CorrectionRecord::from(request);
        assert!(record.always_apply);
        assert_eq!(
            record.predicted_intent.as_ref().map(Intent::as_str),
            Some("create_note")
        );
        assert_eq!(record.corrected_slots["recurring"].as_text(), Some("weekly"));
    }
}
