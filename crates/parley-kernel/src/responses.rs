//! Phrasing for the decisions that do not reach a domain service.

use parley_protocol::{ActionResult, Decision, Intent, normalize_text};

const AFFIRMATIONS: [&str; 12] = [
    "yes",
    "yeah",
    "yep",
    "sure",
    "ok",
    "okay",
    "do it",
    "confirm",
    "go ahead",
    "yes please",
    "please do",
    "sounds good",
];

const NEGATIONS: [&str; 9] = [
    "no",
    "nope",
    "cancel",
    "never mind",
    "nevermind",
    "don't",
    "stop",
    "no thanks",
    "forget it",
];

/// How an utterance answers a pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Affirm,
    Decline,
    Other,
}

pub(crate) fn reply_to_pending(text: &str) -> Reply {
    let normalized = normalize_text(text);
    if AFFIRMATIONS.contains(&normalized.as_str()) {
        Reply::Affirm
    } else if NEGATIONS.contains(&normalized.as_str()) {
        Reply::Decline
    } else {
        Reply::Other
    }
}

fn action_phrase(intent: &Intent) -> String {
    match intent.as_str() {
        Intent::CREATE_EVENT => "add an event to your calendar".to_owned(),
        Intent::CREATE_REMINDER => "set a reminder".to_owned(),
        Intent::CREATE_NOTE => "save a note".to_owned(),
        Intent::SEND_EMAIL => "draft an email".to_owned(),
        Intent::LIST_EVENTS => "check your calendar".to_owned(),
        other => other.replace('_', " "),
    }
}

fn subject(decision: &Decision) -> Option<String> {
    ["title", "subject"]
        .iter()
        .find_map(|key| decision.slots.get(*key))
        .map(|value| value.render())
        .filter(|subject| !subject.is_empty())
}

pub(crate) fn confirm_prompt(decision: &Decision) -> String {
    let action = action_phrase(&decision.intent);
    match subject(decision) {
        Some(subject) => format!("Do you want me to {action}: \"{subject}\"?"),
        None => format!("Do you want me to {action}?"),
    }
}

pub(crate) fn confirm_result(prompt: &str) -> ActionResult {
    ActionResult::succeeded(prompt).with_follow_up("Say yes to go ahead or no to cancel.")
}

pub(crate) fn clarify_result(decision: &Decision) -> ActionResult {
    if decision.intent.is_unknown() {
        return ActionResult::failed("Sorry, I didn't understand that.")
            .with_follow_up("Could you rephrase it as an event, reminder, note, or email?");
    }
    let action = action_phrase(&decision.intent);
    ActionResult::failed(format!("I'm not sure I understood. Did you want me to {action}?"))
        .with_follow_up("Could you say that again with a bit more detail?")
}

/// A dispatch rejected by validation; the reason is already user-facing.
pub(crate) fn rejected_result(reason: &str) -> ActionResult {
    let mut sentence = capitalize(reason.trim());
    if !sentence.ends_with(['.', '?', '!']) {
        sentence.push('.');
    }
    if sentence.ends_with('?') {
        ActionResult::failed(sentence.clone()).with_follow_up(sentence)
    } else {
        ActionResult::failed(sentence).with_follow_up("Could you give me a different time?")
    }
}

pub(crate) fn service_failure_result() -> ActionResult {
    ActionResult::failed("Sorry, something went wrong on my end. Please try again in a moment.")
        .with_spoken("Sorry, something went wrong. Please try again.")
}

pub(crate) fn declined_result() -> ActionResult {
    ActionResult::succeeded("Okay, I won't do that.").with_spoken("Okay, cancelled.")
}

pub(crate) fn empty_input_result() -> ActionResult {
    ActionResult::failed("I didn't catch anything.").with_follow_up("What would you like me to do?")
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{ClassificationResult, DecisionKind, Provenance, SlotValue};

    #[test]
    fn recognizes_affirmations_and_negations() {
        assert_eq!(reply_to_pending("Yes!"), Reply::Affirm);
        assert_eq!(reply_to_pending("  go ahead "), Reply::Affirm);
        assert_eq!(reply_to_pending("Never mind."), Reply::Decline);
        assert_eq!(reply_to_pending("no"), Reply::Decline);
        assert_eq!(reply_to_pending("yes, and also remind me"), Reply::Other);
    }

    #[test]
    fn confirm_prompt_names_the_action_and_subject() {
        let mut result =
            ClassificationResult::new(Intent::new("create_event"), 0.85, Provenance::Model);
        result.slots.insert("title".to_owned(), SlotValue::from("Weekly sync"));
        let decision = Decision::from_result(DecisionKind::Confirm, &result, "confidence 0.85");
        assert_eq!(
            confirm_prompt(&decision),
            "Do you want me to add an event to your calendar: \"Weekly sync\"?"
        );
    }

    #[test]
    fn rejection_reasons_become_sentences() {
        let result = rejected_result("that time has already passed");
        assert_eq!(result.message, "That time has already passed.");
        assert!(!result.success);

        let result = rejected_result("who should I send it to?");
        assert_eq!(result.message, "Who should I send it to?");
        assert_eq!(result.follow_up.as_deref(), Some("Who should I send it to?"));
    }
}
