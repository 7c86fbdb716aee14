use std::sync::Arc;

use parley_completion::prompts;
use parley_memory::PatternMemory;
use parley_protocol::{
    ClassificationResult, CompletionPort, Intent, Provenance, SessionContext, normalize_text,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::rules::RuleClassifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Rule results strictly above this skip the model entirely.
    pub rule_high_cutoff: f32,
    /// Confidence attached to a model answer that names a known intent.
    pub model_confidence: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rule_high_cutoff: 0.8,
            model_confidence: 0.85,
        }
    }
}

/// A classification plus whether it came from a durable pattern memory hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub result: ClassificationResult,
    pub pattern_hit: bool,
}

/// Pattern memory, then rules, then the completion backend.
pub struct IntentClassifier {
    rules: RuleClassifier,
    patterns: Arc<PatternMemory>,
    completion: Option<Arc<dyn CompletionPort>>,
    config: ClassifierConfig,
}

impl IntentClassifier {
    pub fn new(patterns: Arc<PatternMemory>, config: ClassifierConfig) -> Self {
        Self {
            rules: RuleClassifier::new(),
            patterns,
            completion: None,
            config,
        }
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionPort>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Never fails: backend errors fall back to the rule result or `unknown`.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn classify(&self, text: &str) -> ClassificationResult {
        if text.trim().is_empty() {
            return ClassificationResult::unknown(Provenance::Rule);
        }

        if let Some(hit) = self.patterns.lookup(text) {
            debug!(key = %hit.entry.key, exact = hit.exact, "classified from pattern memory");
            return ClassificationResult::new(hit.entry.intent, 1.0, Provenance::PatternMemory)
                .with_slots(hit.entry.slots);
        }

        let rule_result = self.rules.classify(text);
        if let Some(result) = &rule_result
            && result.confidence > self.config.rule_high_cutoff
        {
            debug!(intent = %result.intent, confidence = result.confidence, "rule result accepted");
            return result.clone();
        }

        let Some(completion) = &self.completion else {
            return rule_result.unwrap_or_else(|| ClassificationResult::unknown(Provenance::Rule));
        };

        let request = prompts::classification_request(text, &Intent::KNOWN);
        let model_result = match completion.complete(request).await {
            Ok(response) => self.interpret(&response.content),
            Err(error) => {
                warn!(%error, timeout = error.is_timeout(), "model classification failed, using rules");
                return rule_result.unwrap_or_else(|| ClassificationResult::unknown(Provenance::Rule));
            }
        };

        match (rule_result, model_result) {
            (Some(rule), Some(model)) if model.confidence > rule.confidence => model,
            (Some(rule), _) => rule,
            (None, Some(model)) => model,
            (None, None) => ClassificationResult::unknown(Provenance::Model),
        }
    }

    /// Session-scoped corrections take priority over everything else; they
    /// report `pattern-memory` provenance without counting as a durable hit.
    pub async fn classify_for_session(&self, text: &str, session: &SessionContext) -> Classified {
        let key = normalize_text(text);
        if !key.is_empty()
            && let Some(correction) = session.correction_for(&key)
        {
            debug!(session = %session.session_id, "classified from session correction");
            return Classified {
                result: ClassificationResult::new(
                    correction.corrected_intent.clone(),
                    1.0,
                    Provenance::PatternMemory,
                )
                .with_slots(correction.corrected_slots.clone()),
                pattern_hit: false,
            };
        }

        let result = self.classify(text).await;
        Classified {
            pattern_hit: result.provenance == Provenance::PatternMemory,
            result,
        }
    }

    /// Maps a model reply onto the closed intent set. `None` when it names
    /// nothing known (including an explicit `unknown`).
    fn interpret(&self, content: &str) -> Option<ClassificationResult> {
        let answer = sanitize(content);
        if answer.is_empty() {
            return None;
        }

        let candidates: Vec<(&str, String)> = Intent::KNOWN
            .iter()
            .map(|intent| (*intent, sanitize(intent)))
            .collect();
        let matched = candidates
            .iter()
            .find(|(_, candidate)| *candidate == answer)
            .or_else(|| {
                let mut contained = candidates
                    .iter()
                    .filter(|(_, candidate)| answer.contains(candidate.as_str()));
                let first = contained.next()?;
                contained.next().is_none().then_some(first)
            })?;

        Some(ClassificationResult::new(
            Intent::new(matched.0),
            self.config.model_confidence,
            Provenance::Model,
        ))
    }
}

/// Lower-case and keep alphabetic characters only.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use parley_protocol::{
        CompletionError, CompletionRequest, CompletionResponse, CorrectionRecord, SessionId,
        Slots, SlotValue,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedPort {
        reply: Result<String, CompletionError>,
        calls: AtomicUsize,
    }

    impl ScriptedPort {
        fn new(reply: Result<&str, CompletionError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_owned),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionPort for ScriptedPort {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map(|content| CompletionResponse {
                content,
                model_id: "scripted".to_owned(),
                elapsed_ms: 3,
            })
        }
    }

    fn classifier_with(port: Arc<ScriptedPort>) -> (IntentClassifier, Arc<PatternMemory>) {
        let patterns = Arc::new(PatternMemory::in_memory());
        let classifier =
            IntentClassifier::new(patterns.clone(), ClassifierConfig::default()).with_completion(port);
        (classifier, patterns)
    }

    #[tokio::test]
    async fn pattern_memory_wins_over_rules_and_model() -> Result<()> {
        let port = ScriptedPort::new(Ok("send_email"));
        let (classifier, patterns) = classifier_with(port.clone());
        let mut slots = Slots::new();
        slots.insert("recurring".into(), SlotValue::from("weekly"));
        patterns
            .upsert("remind me about the sync", Intent::new("create_event"), slots.clone())
            .await?;

        let result = classifier.classify("Remind me about the sync").await;
        assert_eq!(result.intent.as_str(), "create_event");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.provenance, Provenance::PatternMemory);
        assert_eq!(result.slots, slots);
        assert_eq!(port.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn confident_rules_skip_the_model() {
        let port = ScriptedPort::new(Ok("create_note"));
        let (classifier, _) = classifier_with(port.clone());
        let result = classifier.classify("remind me to call the bank").await;
        assert_eq!(result.intent.as_str(), "create_reminder");
        assert_eq!(result.provenance, Provenance::Rule);
        assert_eq!(port.calls(), 0);
    }

    #[tokio::test]
    async fn model_wins_when_more_confident_than_rules() {
        let port = ScriptedPort::new(Ok("  Create_Event.\n"));
        let (classifier, _) = classifier_with(port.clone());
        let result = classifier.classify("weekly sync tomorrow").await;
        assert_eq!(port.calls(), 1);
        assert_eq!(result.intent.as_str(), "create_event");
        assert_eq!(result.provenance, Provenance::Model);
        assert_eq!(result.confidence, 0.85);
    }

    #[tokio::test]
    async fn garbage_model_reply_keeps_rule_result_or_unknown() {
        let port = ScriptedPort::new(Ok("I think you want pizza"));
        let (classifier, _) = classifier_with(port.clone());
        let result = classifier.classify("email Bob").await;
        assert_eq!(result.intent.as_str(), "send_email");
        assert_eq!(result.provenance, Provenance::Rule);

        let result = classifier.classify("order a pizza").await;
        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.provenance, Provenance::Model);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_rules_then_unknown() {
        let port = ScriptedPort::new(Err(CompletionError::Timeout { elapsed_ms: 15_000 }));
        let (classifier, _) = classifier_with(port.clone());

        let result = classifier.classify("email Bob").await;
        assert_eq!(result.intent.as_str(), "send_email");
        assert_eq!(result.provenance, Provenance::Rule);

        let result = classifier.classify("order a pizza").await;
        assert!(result.is_unknown());
        assert_eq!(result.provenance, Provenance::Rule);
        assert_eq!(port.calls(), 2);
    }

    #[tokio::test]
    async fn ambiguous_model_reply_is_rejected() {
        let port = ScriptedPort::new(Ok("create_event or create_note"));
        let (classifier, _) = classifier_with(port);
        let result = classifier.classify("something vague").await;
        assert!(result.is_unknown());
    }

    #[tokio::test]
    async fn empty_text_is_unknown_without_calls() {
        let port = ScriptedPort::new(Ok("create_note"));
        let (classifier, _) = classifier_with(port.clone());
        assert!(classifier.classify("   ").await.is_unknown());
        assert_eq!(port.calls(), 0);
    }

    #[tokio::test]
    async fn session_correction_applies_only_to_that_session() {
        let port = ScriptedPort::new(Ok("unknown"));
        let (classifier, _) = classifier_with(port);

        let mut corrected = SessionContext::new(SessionId::from_string("a"), None);
        corrected.corrections.push(CorrectionRecord::new(
            "Lunch with Bo",
            Intent::new("create_event"),
            Slots::new(),
            false,
        ));
        let untouched = SessionContext::new(SessionId::from_string("b"), None);

        let classified = classifier.classify_for_session("lunch with bo", &corrected).await;
        assert_eq!(classified.result.intent.as_str(), "create_event");
        assert_eq!(classified.result.provenance, Provenance::PatternMemory);
        assert!(!classified.pattern_hit);

        let classified = classifier.classify_for_session("lunch with bo", &untouched).await;
        assert_ne!(classified.result.provenance, Provenance::PatternMemory);
    }

    #[test]
    fn sanitize_strips_everything_but_letters() {
        assert_eq!(sanitize(" Send_Email!\n"), "sendemail");
        assert_eq!(sanitize("42"), "");
    }
}
