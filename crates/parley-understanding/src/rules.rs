//! Keyword-weighted rule classifier.

use once_cell::sync::Lazy;
use parley_protocol::{ClassificationResult, Intent, Provenance};
use regex::Regex;

/// When the runner-up scores within this margin of the winner the result is
/// flagged ambiguous.
pub const AMBIGUITY_MARGIN: f32 = 0.15;

struct IntentRule {
    intent: &'static str,
    pattern: Regex,
    weight: f32,
}

fn rule(intent: &'static str, pattern: &str, weight: f32) -> IntentRule {
    IntentRule {
        intent,
        pattern: Regex::new(&format!("(?i){pattern}")).unwrap(),
        weight,
    }
}

static RULES: Lazy<Vec<IntentRule>> = Lazy::new(|| {
    vec![
        rule(Intent::CREATE_EVENT, r"\bschedule\b", 0.5),
        rule(Intent::CREATE_EVENT, r"\b(meeting|appointment|sync|standup|stand-up)\b", 0.45),
        rule(Intent::CREATE_EVENT, r"\b(set up|book|arrange|plan)\b", 0.3),
        rule(Intent::CREATE_EVENT, r"\b(add|put)\b.*\b(calendar|diary)\b", 0.5),
        rule(Intent::CREATE_EVENT, r"\b(event|call with|lunch with|dinner with|coffee with)\b", 0.35),
        rule(Intent::CREATE_EVENT, r"\b(at \d{1,2}|\d{1,2}(:\d{2})?\s*(am|pm)|tomorrow|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b", 0.2),
        rule(Intent::CREATE_REMINDER, r"\bremind me\b", 0.9),
        rule(Intent::CREATE_REMINDER, r"\breminder\b", 0.6),
        rule(Intent::CREATE_REMINDER, r"\b(don't let me forget|do not let me forget)\b", 0.7),
        rule(Intent::CREATE_REMINDER, r"\b(alert me|ping me|nudge me)\b", 0.5),
        rule(Intent::CREATE_NOTE, r"\b(take|make|write|add) a note\b", 0.85),
        rule(Intent::CREATE_NOTE, r"\b(jot down|write down|note down|note that)\b", 0.7),
        rule(Intent::CREATE_NOTE, r"\bnotes?\b", 0.4),
        rule(Intent::CREATE_NOTE, r"^\s*note\s*:", 0.4),
        rule(Intent::SEND_EMAIL, r"\b(e-?mail)\b", 0.6),
        rule(Intent::SEND_EMAIL, r"\bsend\b.*\b(message|mail|note to)\b", 0.35),
        rule(Intent::SEND_EMAIL, r"\b(write to|reply to|message)\b", 0.3),
        rule(Intent::SEND_EMAIL, r"[\w.+-]+@[\w-]+\.[\w.]+", 0.3),
        rule(Intent::LIST_EVENTS, r"\bwhat('s| is) on my (calendar|schedule|agenda)\b", 0.9),
        rule(Intent::LIST_EVENTS, r"\b(show|list|read|tell me)\b.*\b(events|meetings|calendar|schedule|agenda)\b", 0.85),
        rule(Intent::LIST_EVENTS, r"\bwhat (meetings|events|appointments) do i have\b", 0.9),
        rule(Intent::LIST_EVENTS, r"\b(am i free|agenda|my day look)\b", 0.5),
    ]
});

/// Deterministic classifier: sums the weights of matching patterns per
/// intent and reports the best intent with the capped sum as confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Non-zero scores per intent, highest first (ties in declaration order).
    pub fn scores(&self, text: &str) -> Vec<(Intent, f32)> {
        let mut totals: Vec<(&'static str, f32)> = Vec::new();
        for rule in RULES.iter() {
            if !rule.pattern.is_match(text) {
                continue;
            }
            match totals.iter_mut().find(|(intent, _)| *intent == rule.intent) {
                Some((_, total)) => *total += rule.weight,
                None => totals.push((rule.intent, rule.weight)),
            }
        }
        totals.sort_by(|left, right| right.1.total_cmp(&left.1));
        totals
            .into_iter()
            .map(|(intent, total)| (Intent::new(intent), total.min(1.0)))
            .collect()
    }

    /// `None` when no rule fires.
    pub fn classify(&self, text: &str) -> Option<ClassificationResult> {
        let scores = self.scores(text);
        let (intent, confidence) = scores.first()?.clone();
        let ambiguous = scores
            .get(1)
            .is_some_and(|(_, runner_up)| confidence - runner_up < AMBIGUITY_MARGIN);
        Some(ClassificationResult::new(intent, confidence, Provenance::Rule).with_ambiguity(ambiguous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Option<(String, f32, bool)> {
        RuleClassifier::new()
            .classify(text)
            .map(|result| (result.intent.as_str().to_owned(), result.confidence, result.ambiguous))
    }

    #[test]
    fn strong_phrases_clear_the_high_cutoff() {
        let (intent, confidence, _) = classify("Remind me to water the plants").unwrap();
        assert_eq!(intent, "create_reminder");
        assert!(confidence > 0.8);

        let (intent, confidence, _) = classify("schedule a meeting with Ana tomorrow at 3pm").unwrap();
        assert_eq!(intent, "create_event");
        assert!(confidence > 0.8);

        let (intent, confidence, _) = classify("What's on my calendar today?").unwrap();
        assert_eq!(intent, "list_events");
        assert!(confidence > 0.8);

        let (intent, _, _) = classify("take a note: the wifi password is hunter2").unwrap();
        assert_eq!(intent, "create_note");
    }

    #[test]
    fn weak_signal_stays_below_cutoff() {
        let (intent, confidence, _) = classify("email Bob").unwrap();
        assert_eq!(intent, "send_email");
        assert!(confidence < 0.8);
    }

    #[test]
    fn close_competitors_are_flagged_ambiguous() {
        let (_, _, ambiguous) = classify("note the meeting").unwrap();
        assert!(ambiguous);
        let (_, _, ambiguous) = classify("remind me about the meeting").unwrap();
        assert!(!ambiguous);
    }

    #[test]
    fn confidence_is_capped_at_one() {
        let (_, confidence, _) =
            classify("schedule a meeting, book the appointment, add it to my calendar").unwrap();
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn unrelated_text_matches_nothing() {
        assert!(classify("the quick brown fox").is_none());
        assert!(RuleClassifier::new().scores("").is_empty());
    }
}
