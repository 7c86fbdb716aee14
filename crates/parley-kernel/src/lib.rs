//! Pipeline composition: builds every component once and runs utterances
//! and corrections through them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_completion::{CachedCompletion, OllamaCompletionClient};
use parley_dispatch::{ActionDispatcher, DispatchError, ServiceRegistry};
use parley_events::{
    EventJournal, EventRecord, EventStore, EventStreamHub, FileEventStore, InMemoryEventStore,
    PipelineEvent,
};
use parley_memory::{
    ContextManager, FilePatternStore, FileSessionStore, InMemoryPatternStore,
    InMemorySessionStore, PatternMemory, PatternStore, SessionStore,
};
use parley_policy::{DecisionInput, DecisionPolicy, PolicyConfig};
use parley_protocol::{
    ActionResult, AssistResponse, AssistantError, AssistantResult, ClassificationResult, Clock,
    CompletionPort, CorrectionRecord, Decision, DecisionKind, PatternMemoryEntry, PendingAction,
    Provenance, SessionContext, SessionId, SystemClock, Turn, TurnMetadata, Utterance,
};
use parley_understanding::{ClassifierConfig, IntentClassifier, SlotExtractor, merge_missing};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

mod config;
mod responses;

pub use config::PipelineConfig;
pub use parley_completion::CompletionConfig;
pub use parley_policy::PolicyKind;

use responses::Reply;

pub struct AssistantBuilder {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    completion: Option<Arc<dyn CompletionPort>>,
    services: Option<ServiceRegistry>,
}

impl Default for AssistantBuilder {
    fn default() -> Self {
        Self::from_config(PipelineConfig::default())
    }
}

impl AssistantBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: PipelineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            completion: None,
            services: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = Some(root.into());
        self
    }

    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.config.classifier = classifier;
        self
    }

    pub fn history_cap(mut self, cap: usize) -> Self {
        self.config.context.history_cap = cap;
        self
    }

    pub fn min_slots_before_model(mut self, min_slots: usize) -> Self {
        self.config.min_slots_before_model = min_slots;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    pub fn completion_config(mut self, completion: CompletionConfig) -> Self {
        self.config.completion = Some(completion);
        self
    }

    /// Uses `port` as the completion backend instead of the configured one.
    pub fn completion(mut self, port: Arc<dyn CompletionPort>) -> Self {
        self.completion = Some(port);
        self
    }

    pub fn without_completion(mut self) -> Self {
        self.config.completion = None;
        self.completion = None;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn services(mut self, services: ServiceRegistry) -> Self {
        self.services = Some(services);
        self
    }

    pub async fn build(self) -> Result<Assistant> {
        let config = self.config;
        let (session_store, pattern_store, event_store): (
            Arc<dyn SessionStore>,
            Arc<dyn PatternStore>,
            Arc<dyn EventStore>,
        ) = match &config.storage_root {
            Some(root) => (
                Arc::new(FileSessionStore::new(root)),
                Arc::new(FilePatternStore::new(root)),
                Arc::new(FileEventStore::new(root)),
            ),
            None => (
                Arc::new(InMemorySessionStore::default()),
                Arc::new(InMemoryPatternStore::default()),
                Arc::new(InMemoryEventStore::new()),
            ),
        };

        let patterns = Arc::new(
            PatternMemory::load(pattern_store)
                .await
                .context("failed loading pattern memory")?,
        );

        let backend = self.completion.or_else(|| {
            config.completion.clone().map(|completion| {
                Arc::new(OllamaCompletionClient::new(completion)) as Arc<dyn CompletionPort>
            })
        });
        let backend = backend.map(|inner| {
            if config.cache_capacity == 0 {
                inner
            } else {
                Arc::new(CachedCompletion::new(inner, config.cache_capacity))
                    as Arc<dyn CompletionPort>
            }
        });

        let mut classifier = IntentClassifier::new(patterns.clone(), config.classifier.clone());
        let mut extractor = SlotExtractor::new(self.clock.clone())
            .with_min_slots_before_model(config.min_slots_before_model);
        if let Some(backend) = &backend {
            classifier = classifier.with_completion(backend.clone());
            extractor = extractor.with_completion(backend.clone());
        }

        let services = self
            .services
            .unwrap_or_else(|| ServiceRegistry::with_in_memory_services(self.clock.clone()));
        let policy = config.policy.build();
        info!(
            policy = policy.name(),
            model = backend.is_some(),
            persistent = config.storage_root.is_some(),
            patterns = patterns.len(),
            "assistant pipeline assembled"
        );

        Ok(Assistant {
            classifier: Arc::new(classifier),
            extractor: Arc::new(extractor),
            policy,
            context: Arc::new(ContextManager::new(session_store, config.context.clone())),
            patterns,
            dispatcher: ActionDispatcher::new(Arc::new(services)),
            journal: EventJournal::new(event_store, EventStreamHub::new(config.event_buffer)),
        })
    }
}

#[derive(Clone)]
pub struct Assistant {
    classifier: Arc<IntentClassifier>,
    extractor: Arc<SlotExtractor>,
    policy: Arc<dyn DecisionPolicy>,
    context: Arc<ContextManager>,
    patterns: Arc<PatternMemory>,
    dispatcher: ActionDispatcher,
    journal: EventJournal,
}

impl Assistant {
    pub fn builder() -> AssistantBuilder {
        AssistantBuilder::new()
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Runs one utterance end to end while holding the session's lock.
    #[instrument(skip(self, utterance), fields(session_id = tracing::field::Empty))]
    pub async fn process(&self, utterance: Utterance) -> AssistantResult<AssistResponse> {
        let session_id = utterance.session_id.clone().unwrap_or_default();
        tracing::Span::current().record("session_id", tracing::field::display(&session_id));
        let text = utterance.text.trim().to_owned();

        let _session_guard = self.context.lock(&session_id).await;
        let mut session = self
            .context
            .get_or_create(&session_id, utterance.user_id.as_ref())
            .await?;
        self.journal(
            &session_id,
            PipelineEvent::UtteranceReceived {
                text: text.clone(),
                user_id: utterance.user_id.clone(),
            },
        )
        .await;

        if let Some(pending) = session.pending.take() {
            self.context.set_pending(&session_id, None)?;
            match responses::reply_to_pending(&text) {
                Reply::Affirm => {
                    let decision = pending.into_decision("confirmed by user");
                    return self.conclude(&session_id, &text, decision).await;
                }
                Reply::Decline => {
                    let result = ClassificationResult::new(
                        pending.intent,
                        pending.confidence,
                        pending.provenance,
                    )
                    .with_slots(pending.slots);
                    let decision = Decision::from_result(
                        DecisionKind::Clarify,
                        &result,
                        "pending action declined",
                    );
                    self.journal_decision(&session_id, &decision).await;
                    return self
                        .finish(&session_id, Some(&text), decision, responses::declined_result())
                        .await;
                }
                Reply::Other => info!("pending action dropped by a new request"),
            }
        }

        let classified = self.classifier.classify_for_session(&text, &session).await;
        let mut result = classified.result;
        if !result.is_unknown() {
            let extracted = self.extractor.extract_slots(&text, &result.intent).await;
            merge_missing(&mut result.slots, extracted);
        }
        self.journal(
            &session_id,
            PipelineEvent::IntentClassified {
                intent: result.intent.clone(),
                confidence: result.confidence,
                provenance: result.provenance,
                ambiguous: result.ambiguous,
                slots: result.slots.clone(),
            },
        )
        .await;

        let decision = self.policy.decide(DecisionInput {
            text: &text,
            result: &result,
            session: &session,
            pattern_hit: classified.pattern_hit,
        });
        self.conclude(&session_id, &text, decision).await
    }

    /// Re-dispatches the corrected intent and slots at full confidence and
    /// remembers the correction: process-wide when `always_apply`, otherwise
    /// for this session only.
    #[instrument(
        skip(self, session_id, correction),
        fields(session_id = %session_id, intent = %correction.corrected_intent, always_apply = correction.always_apply)
    )]
    pub async fn apply_correction(
        &self,
        session_id: &SessionId,
        correction: CorrectionRecord,
    ) -> AssistantResult<(Decision, AssistResponse)> {
        if correction.normalized_key().is_empty() {
            return Err(AssistantError::InvalidInput(
                "correction text is empty".to_owned(),
            ));
        }

        let _session_guard = self.context.lock(session_id).await;
        if self.context.get(session_id).await?.is_none() {
            return Err(AssistantError::SessionNotFound(session_id.to_string()));
        }
        self.context.set_pending(session_id, None)?;

        let intent = correction.corrected_intent.clone();
        let slots = correction.corrected_slots.clone();
        let original_text = correction.original_text.clone();
        let always_apply = correction.always_apply;
        let frequency = if always_apply {
            let entry = self
                .patterns
                .upsert(&original_text, intent.clone(), slots.clone())
                .await?;
            Some(entry.frequency)
        } else {
            self.context.record_correction(session_id, correction)?;
            None
        };
        info!(?frequency, "correction applied");
        self.journal(
            session_id,
            PipelineEvent::CorrectionApplied {
                original_text,
                intent: intent.clone(),
                always_apply,
                frequency,
            },
        )
        .await;

        let result =
            ClassificationResult::new(intent, 1.0, Provenance::PatternMemory).with_slots(slots);
        let decision = Decision::from_result(DecisionKind::Execute, &result, "user correction");
        self.journal_decision(session_id, &decision).await;
        let (decision, action) = self.act(session_id, decision).await;
        let response = self.finish(session_id, None, decision.clone(), action).await?;
        Ok((decision, response))
    }

    pub async fn session(&self, session_id: &SessionId) -> AssistantResult<Option<SessionContext>> {
        self.context.get(session_id).await
    }

    /// Forgets a session. Returns whether it existed.
    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    pub async fn clear_session(&self, session_id: &SessionId) -> AssistantResult<bool> {
        let _session_guard = self.context.lock(session_id).await;
        let existed = self.context.clear(session_id).await?;
        if existed {
            self.journal(session_id, PipelineEvent::SessionCleared).await;
        }
        Ok(existed)
    }

    /// Learned patterns, most frequent first.
    pub fn patterns(&self) -> Vec<PatternMemoryEntry> {
        self.patterns.entries()
    }

    pub fn pattern_memory(&self) -> Arc<PatternMemory> {
        self.patterns.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EventRecord> {
        self.journal.subscribe()
    }

    pub async fn read_events(
        &self,
        session_id: &SessionId,
        from_sequence: u64,
        limit: usize,
    ) -> AssistantResult<Vec<EventRecord>> {
        self.journal
            .read_from(session_id, from_sequence, limit)
            .await
            .map_err(|error| AssistantError::Storage(format!("{error:#}")))
    }

    /// Journals the decision, acts on it, and records the exchange.
    async fn conclude(
        &self,
        session_id: &SessionId,
        text: &str,
        decision: Decision,
    ) -> AssistantResult<AssistResponse> {
        self.journal_decision(session_id, &decision).await;
        let (decision, action) = self.act(session_id, decision).await;
        self.finish(session_id, Some(text), decision, action).await
    }

    async fn act(&self, session_id: &SessionId, decision: Decision) -> (Decision, ActionResult) {
        match decision.kind {
            kind if kind.dispatches() => {
                let dispatched = self
                    .dispatcher
                    .dispatch(&decision.intent, &decision.slots, session_id)
                    .await;
                let (decision, action) = match dispatched {
                    Ok(action) => (decision, action),
                    Err(DispatchError::Rejected { reason, .. }) => {
                        let action = responses::rejected_result(&reason);
                        (decision.downgrade(DecisionKind::Clarify, reason), action)
                    }
                    Err(error @ DispatchError::Service { .. }) => (
                        decision.downgrade(DecisionKind::Error, error.to_string()),
                        responses::service_failure_result(),
                    ),
                };
                self.journal(
                    session_id,
                    PipelineEvent::ActionDispatched {
                        intent: decision.intent.clone(),
                        success: action.success,
                        message: action.message.clone(),
                    },
                )
                .await;
                (decision, action)
            }
            DecisionKind::Confirm => {
                let prompt = responses::confirm_prompt(&decision);
                let pending = PendingAction::from_decision(&decision, prompt.clone());
                if let Err(error) = self.context.set_pending(session_id, Some(pending)) {
                    warn!(%error, "pending confirmation not stored");
                }
                (decision, responses::confirm_result(&prompt))
            }
            DecisionKind::Clarify => {
                let action = responses::clarify_result(&decision);
                (decision, action)
            }
            _ => (decision, responses::empty_input_result()),
        }
    }

    /// Appends the user (when there was one) and assistant turns, persists
    /// the session, and builds the wire response.
    async fn finish(
        &self,
        session_id: &SessionId,
        user_text: Option<&str>,
        decision: Decision,
        action: ActionResult,
    ) -> AssistantResult<AssistResponse> {
        if let Some(text) = user_text {
            let metadata = TurnMetadata {
                intent: Some(decision.intent.clone()),
                confidence: Some(decision.confidence),
                decision: Some(decision.kind),
            };
            self.context
                .append(session_id, Turn::user(text).with_metadata(metadata))?;
        }
        let reply = Turn::assistant(action.message.clone()).with_metadata(TurnMetadata {
            decision: Some(decision.kind),
            ..TurnMetadata::default()
        });
        self.context.append(session_id, reply)?;
        self.context.save(session_id).await?;

        info!(
            decision = %decision.kind,
            intent = %decision.intent,
            confidence = decision.confidence,
            provenance = %decision.provenance,
            success = action.success,
            "utterance handled"
        );
        Ok(AssistResponse::from_parts(session_id.clone(), &decision, action))
    }

    async fn journal_decision(&self, session_id: &SessionId, decision: &Decision) {
        self.journal(
            session_id,
            PipelineEvent::DecisionMade {
                kind: decision.kind,
                policy: self.policy.name().to_owned(),
                rationale: decision.rationale.clone(),
            },
        )
        .await;
    }

    /// The journal is an audit trail; failing to write it never fails the
    /// request.
    async fn journal(&self, session_id: &SessionId, event: PipelineEvent) {
        if let Err(error) = self.journal.record(session_id, event).await {
            warn!(error = %format!("{error:#}"), "journal write failed");
        }
    }
}
