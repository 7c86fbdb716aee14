use parley_protocol::{Role, Turn, WorkingMemory};

const KEY_FACT_TRIGGERS: [&str; 4] = ["my name is", "remember that", "i prefer", "i live in"];
const ACTION_TRIGGERS: [&str; 3] = ["i need to", "don't forget to", "todo"];
const MAX_FACTS: usize = 20;
const MAX_ACTIONS: usize = 20;

/// Updates the heuristic working memory from a freshly appended turn.
pub fn observe_turn(memory: &mut WorkingMemory, turn: &Turn, recent_topics_cap: usize) {
    if turn.role == Role::User {
        for fact in clauses_after(&turn.content, &KEY_FACT_TRIGGERS, true) {
            push_bounded(&mut memory.key_facts, fact, MAX_FACTS);
        }
        for action in clauses_after(&turn.content, &ACTION_TRIGGERS, false) {
            push_bounded(&mut memory.pending_actions, action, MAX_ACTIONS);
        }
    }

    if let Some(intent) = turn.intent().filter(|intent| !intent.is_unknown()) {
        memory.current_task = Some(intent.as_str().to_owned());
        memory.recent_topics.retain(|topic| topic != intent.as_str());
        memory.recent_topics.push(intent.as_str().to_owned());
        let cap = recent_topics_cap.max(1);
        if memory.recent_topics.len() > cap {
            let overflow = memory.recent_topics.len() - cap;
            memory.recent_topics.drain(..overflow);
        }
    }
}

/// For every trigger found, the sentence fragment it starts (`keep_trigger`)
/// or the fragment following it.
fn clauses_after(text: &str, triggers: &[&str], keep_trigger: bool) -> Vec<String> {
    let lowered = text.to_lowercase();
    // lower-casing can change byte offsets for non-ASCII input
    if lowered.len() != text.len() {
        return Vec::new();
    }

    let mut clauses = Vec::new();
    for trigger in triggers {
        let mut from = 0;
        while let Some(offset) = lowered[from..].find(trigger) {
            let start = from + offset;
            let after = start + trigger.len();
            let at_word_start = start == 0 || !lowered.as_bytes()[start - 1].is_ascii_alphanumeric();
            let at_word_end = lowered
                .as_bytes()
                .get(after)
                .is_none_or(|byte| !byte.is_ascii_alphanumeric());
            from = after;
            if !(at_word_start && at_word_end) {
                continue;
            }

            let end = text[after..]
                .find(['.', '!', '?', ';', '\n'])
                .map_or(text.len(), |offset| after + offset);
            let body = text[after..end].trim_matches(|c: char| c.is_whitespace() || c == ':');
            if body.is_empty() {
                continue;
            }
            let clause = if keep_trigger {
                format!("{} {body}", text[start..after].trim())
            } else {
                body.to_owned()
            };
            clauses.push(clause);
        }
    }
    clauses
}

fn push_bounded(items: &mut Vec<String>, item: String, cap: usize) {
    if items.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
        return;
    }
    items.push(item);
    if items.len() > cap {
        items.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{DecisionKind, Intent, TurnMetadata};

    fn classified(content: &str, intent: &str) -> Turn {
        Turn::user(content).with_metadata(TurnMetadata {
            intent: Some(Intent::new(intent)),
            confidence: Some(0.9),
            decision: Some(DecisionKind::Execute),
        })
    }

    #[test]
    fn key_facts_and_actions_are_captured() {
        let mut memory = WorkingMemory::default();
        observe_turn(
            &mut memory,
            &Turn::user("My name is Ana. I need to renew my passport! Remember that I live in Lisbon"),
            5,
        );
        assert_eq!(
            memory.key_facts,
            vec![
                "My name is Ana".to_owned(),
                "Remember that I live in Lisbon".to_owned(),
                "I live in Lisbon".to_owned(),
            ]
        );
        assert_eq!(memory.pending_actions, vec!["renew my passport".to_owned()]);
    }

    #[test]
    fn trigger_must_be_a_whole_phrase() {
        let mut memory = WorkingMemory::default();
        observe_turn(&mut memory, &Turn::user("the todolist app is slow"), 5);
        assert!(memory.pending_actions.is_empty());
    }

    #[test]
    fn assistant_turns_do_not_add_facts() {
        let mut memory = WorkingMemory::default();
        observe_turn(&mut memory, &Turn::assistant("My name is Parley."), 5);
        assert!(memory.key_facts.is_empty());
    }

    #[test]
    fn recent_topics_are_deduplicated_and_bounded() {
        let mut memory = WorkingMemory::default();
        for intent in [
            "create_event",
            "create_note",
            "create_event",
            "send_email",
            "list_events",
            "create_reminder",
            "unknown",
        ] {
            observe_turn(&mut memory, &classified("x", intent), 3);
        }
        assert_eq!(
            memory.recent_topics,
            vec!["send_email", "list_events", "create_reminder"]
        );
        assert_eq!(memory.current_task.as_deref(), Some("create_reminder"));
    }
}
