//! Prompt templates for the two completion-backed stages.

use chrono::NaiveDateTime;
use parley_protocol::{CompletionRequest, Intent};

const CLASSIFY_SYSTEM: &str = "You label requests sent to a personal assistant. \
Respond with only the intent name, exactly as listed, and nothing else. \
If no listed intent fits, respond with unknown.";

const EXTRACT_SYSTEM: &str = "You extract structured fields from requests sent to a \
personal assistant. Respond with a single JSON object. Omit fields that are not \
mentioned. Datetimes use the format YYYY-MM-DDTHH:MM:SS.";

/// Fields the model is asked for, per intent.
pub fn slot_fields(intent: &Intent) -> &'static [&'static str] {
    match intent.as_str() {
        Intent::CREATE_EVENT => &[
            "title",
            "datetime",
            "duration_minutes",
            "location",
            "attendees",
            "recurring",
        ],
        Intent::CREATE_REMINDER => &["title", "datetime", "priority", "recurring"],
        Intent::CREATE_NOTE => &["title", "body"],
        Intent::SEND_EMAIL => &["recipients", "subject", "body"],
        Intent::LIST_EVENTS => &["datetime"],
        _ => &["title"],
    }
}

pub fn classification_request(text: &str, intents: &[&str]) -> CompletionRequest {
    let mut options = intents.join("\n- ");
    options.insert_str(0, "- ");
    let prompt = format!(
        "Intents:\n{options}\n- {unknown}\n\nRequest: \"{text}\"\nIntent:",
        unknown = Intent::UNKNOWN,
        text = text.trim()
    );
    CompletionRequest::new(prompt)
        .with_system(CLASSIFY_SYSTEM)
        .with_temperature(0.0)
        .with_max_tokens(16)
}

pub fn slot_extraction_request(
    text: &str,
    intent: &Intent,
    now: NaiveDateTime,
) -> CompletionRequest {
    let fields = slot_fields(intent).join(", ");
    let prompt = format!(
        "Current local time: {now}\nIntent: {intent}\nFields: {fields}\n\nRequest: \"{text}\"\nJSON:",
        now = now.format("%Y-%m-%dT%H:%M:%S (%A)"),
        text = text.trim()
    );
    CompletionRequest::new(prompt)
        .with_system(EXTRACT_SYSTEM)
        .with_temperature(0.0)
        .json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use parley_protocol::ResponseFormat;

    #[test]
    fn classification_prompt_lists_closed_intent_set() {
        let request = classification_request("  lunch with sam ", &Intent::KNOWN);
        for intent in Intent::KNOWN {
            assert!(request.prompt.contains(&format!("- {intent}")));
        }
        assert!(request.prompt.contains("- unknown"));
        assert!(request.prompt.contains("\"lunch with sam\""));
        assert_eq!(request.response_format, ResponseFormat::Text);
        assert!(
            request
                .system_prompt
                .as_deref()
                .is_some_and(|system| system.contains("only the intent name"))
        );
    }

    #[test]
    fn extraction_prompt_requests_json_for_intent_fields() {
        let now = NaiveDate::from_ymd_opt(2026, 10, 19)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap();
        let request = slot_extraction_request("email ana", &Intent::new("send_email"), now);
        assert_eq!(request.response_format, ResponseFormat::Json);
        assert!(request.prompt.contains("recipients, subject, body"));
        assert!(request.prompt.contains("2026-10-19T09:00:00 (Monday)"));
    }
}
