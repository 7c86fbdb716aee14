use std::sync::Arc;

use parley_protocol::{
    ClassificationResult, Decision, DecisionKind, Provenance, SessionContext,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything the gate looks at for one utterance.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub text: &'a str,
    pub result: &'a ClassificationResult,
    pub session: &'a SessionContext,
    /// The classification came from a durable pattern memory entry.
    pub pattern_hit: bool,
}

/// Single-step state machine from a classification to the next action.
pub trait DecisionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decide(&self, input: DecisionInput<'_>) -> Decision;
}

fn empty_input(input: &DecisionInput<'_>) -> Option<Decision> {
    input.text.trim().is_empty().then(|| {
        Decision::from_result(DecisionKind::Error, input.result, "empty input")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedThresholds {
    pub low: f32,
    pub high: f32,
}

impl Default for FixedThresholds {
    fn default() -> Self {
        Self {
            low: 0.81,
            high: 0.91,
        }
    }
}

/// Two cutoffs: at or above `high` executes, anything below confirms.
/// Learned patterns always execute.
#[derive(Debug, Clone, Default)]
pub struct FixedThresholdPolicy {
    thresholds: FixedThresholds,
}

impl FixedThresholdPolicy {
    pub fn new(thresholds: FixedThresholds) -> Self {
        Self { thresholds }
    }
}

impl DecisionPolicy for FixedThresholdPolicy {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn decide(&self, input: DecisionInput<'_>) -> Decision {
        if let Some(decision) = empty_input(&input) {
            return decision;
        }
        let result = input.result;
        let FixedThresholds { low, high } = self.thresholds;

        let (kind, rationale) = if result.provenance == Provenance::PatternMemory {
            (DecisionKind::Execute, "learned pattern".to_owned())
        } else if result.is_unknown() {
            (DecisionKind::Clarify, "intent not understood".to_owned())
        } else if result.confidence >= high {
            (
                DecisionKind::Execute,
                format!("confidence {:.2} >= {high:.2}", result.confidence),
            )
        } else if result.confidence < low {
            (
                DecisionKind::Confirm,
                format!("confidence {:.2} < {low:.2}", result.confidence),
            )
        } else {
            (
                DecisionKind::Confirm,
                format!(
                    "confidence {:.2} between {low:.2} and {high:.2}",
                    result.confidence
                ),
            )
        };
        debug!(policy = self.name(), kind = %kind, %rationale, "decision made");
        Decision::from_result(kind, result, rationale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemanticThresholds {
    pub high: f32,
    pub medium: f32,
}

impl Default for SemanticThresholds {
    fn default() -> Self {
        Self {
            high: 0.7,
            medium: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

/// Confidence bands plus ambiguity and pattern hits.
#[derive(Debug, Clone, Default)]
pub struct SemanticPolicy {
    thresholds: SemanticThresholds,
}

impl SemanticPolicy {
    pub fn new(thresholds: SemanticThresholds) -> Self {
        Self { thresholds }
    }

    pub fn band(&self, confidence: f32) -> ConfidenceBand {
        if confidence >= self.thresholds.high {
            ConfidenceBand::High
        } else if confidence >= self.thresholds.medium {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

impl DecisionPolicy for SemanticPolicy {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn decide(&self, input: DecisionInput<'_>) -> Decision {
        if let Some(decision) = empty_input(&input) {
            return decision;
        }
        let result = input.result;
        let band = self.band(result.confidence);

        let (kind, rationale) =
            if input.pattern_hit && result.provenance == Provenance::PatternMemory {
                (DecisionKind::Learn, "applied learned correction")
            } else if result.is_unknown() {
                (DecisionKind::Clarify, "intent not understood")
            } else if band == ConfidenceBand::Low {
                (DecisionKind::Clarify, "low confidence")
            } else if band == ConfidenceBand::Medium {
                (DecisionKind::Confirm, "medium confidence")
            } else if result.ambiguous {
                (DecisionKind::Confirm, "ambiguous between intents")
            } else {
                (DecisionKind::Execute, "high confidence")
            };
        debug!(policy = self.name(), kind = %kind, band = ?band, "decision made");
        Decision::from_result(kind, result, rationale)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Fixed,
    Semantic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    pub fixed: FixedThresholds,
    pub semantic: SemanticThresholds,
}

impl PolicyConfig {
    pub fn build(&self) -> Arc<dyn DecisionPolicy> {
        match self.kind {
            PolicyKind::Fixed => Arc::new(FixedThresholdPolicy::new(self.fixed)),
            PolicyKind::Semantic => Arc::new(SemanticPolicy::new(self.semantic)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{Intent, SessionId};

    fn session() -> SessionContext {
        SessionContext::new(SessionId::from_string("policy"), None)
    }

    fn result(intent: &str, confidence: f32, provenance: Provenance) -> ClassificationResult {
        ClassificationResult::new(Intent::new(intent), confidence, provenance)
    }

    fn decide(
        policy: &dyn DecisionPolicy,
        result: &ClassificationResult,
        pattern_hit: bool,
    ) -> DecisionKind {
        let session = session();
        policy
            .decide(DecisionInput {
                text: "lunch with Sam tomorrow",
                result,
                session: &session,
                pattern_hit,
            })
            .kind
    }

    #[test]
    fn fixed_policy_thresholds() {
        let policy = FixedThresholdPolicy::default();
        let at = |confidence| result("create_event", confidence, Provenance::Model);
        assert_eq!(decide(&policy, &at(0.95), false), DecisionKind::Execute);
        assert_eq!(decide(&policy, &at(0.91), false), DecisionKind::Execute);
        assert_eq!(decide(&policy, &at(0.85), false), DecisionKind::Confirm);
        assert_eq!(decide(&policy, &at(0.5), false), DecisionKind::Confirm);
    }

    #[test]
    fn fixed_policy_always_executes_learned_patterns() {
        let policy = FixedThresholdPolicy::default();
        let learned = result("create_event", 0.3, Provenance::PatternMemory);
        assert_eq!(decide(&policy, &learned, true), DecisionKind::Execute);
    }

    #[test]
    fn fixed_policy_clarifies_unknown() {
        let policy = FixedThresholdPolicy::default();
        let unknown = ClassificationResult::unknown(Provenance::Rule);
        assert_eq!(decide(&policy, &unknown, false), DecisionKind::Clarify);
    }

    #[test]
    fn semantic_policy_bands() {
        let policy = SemanticPolicy::default();
        let at = |confidence| result("create_note", confidence, Provenance::Rule);
        assert_eq!(decide(&policy, &at(0.9), false), DecisionKind::Execute);
        assert_eq!(decide(&policy, &at(0.7), false), DecisionKind::Execute);
        assert_eq!(decide(&policy, &at(0.55), false), DecisionKind::Confirm);
        assert_eq!(decide(&policy, &at(0.2), false), DecisionKind::Clarify);
        assert_eq!(
            decide(&policy, &at(0.9).with_ambiguity(true), false),
            DecisionKind::Confirm
        );
    }

    #[test]
    fn semantic_policy_learns_only_on_durable_hits() {
        let policy = SemanticPolicy::default();
        let learned = result("create_event", 1.0, Provenance::PatternMemory);
        assert_eq!(decide(&policy, &learned, true), DecisionKind::Learn);
        assert_eq!(decide(&policy, &learned, false), DecisionKind::Execute);
    }

    #[test]
    fn empty_input_is_an_error_for_both_policies() {
        let session = session();
        let known = result("create_note", 0.99, Provenance::Rule);
        for policy in [PolicyKind::Fixed, PolicyKind::Semantic].map(|kind| {
            PolicyConfig {
                kind,
                ..PolicyConfig::default()
            }
            .build()
        }) {
            let decision = policy.decide(DecisionInput {
                text: "  ",
                result: &known,
                session: &session,
                pattern_hit: false,
            });
            assert_eq!(decision.kind, DecisionKind::Error);
            assert_eq!(decision.rationale, "empty input");
        }
    }

    #[test]
    fn decisions_carry_the_classification() {
        let policy = SemanticPolicy::default();
        let session = session();
        let classified = result("send_email", 0.8, Provenance::Model);
        let decision = policy.decide(DecisionInput {
            text: "email ana",
            result: &classified,
            session: &session,
            pattern_hit: false,
        });
        assert_eq!(decision.intent.as_str(), "send_email");
        assert_eq!(decision.confidence, 0.8);
        assert_eq!(decision.provenance, Provenance::Model);
        assert!(!decision.rationale.is_empty());
    }

    #[test]
    fn policy_config_reads_snake_case_kind() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"kind":"semantic","semantic":{"high":0.75,"medium":0.5}}"#)
                .unwrap();
        assert_eq!(config.kind, PolicyKind::Semantic);
        assert_eq!(config.fixed, FixedThresholds::default());
        assert_eq!(config.build().name(), "semantic");
    }
}
