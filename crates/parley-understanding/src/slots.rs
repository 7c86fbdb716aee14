//! Slot extraction: ordered rules merged first-writer-wins by precedence
//! tier, with an optional model pass that only fills gaps.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use parley_completion::prompts;
use parley_protocol::{
    AssistantError, AssistantResult, Clock, CompletionPort, Intent, SlotValue, Slots,
};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::datetime::{parse_moment, strip_temporal};

/// Precedence of a rule's output. Lower tiers win conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Deterministic,
    IntentDefault,
    Model,
}

pub type SlotFn = fn(&str, &Intent, NaiveDateTime) -> Slots;

/// One pure extractor with its precedence tier.
#[derive(Clone, Copy)]
pub struct SlotRule {
    pub name: &'static str,
    pub tier: Tier,
    pub apply: SlotFn,
}

impl SlotRule {
    pub const fn new(name: &'static str, tier: Tier, apply: SlotFn) -> Self {
        Self { name, tier, apply }
    }
}

impl std::fmt::Debug for SlotRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRule")
            .field("name", &self.name)
            .field("tier", &self.tier)
            .finish()
    }
}

/// Inserts each key of `incoming` that `into` does not already hold.
pub fn merge_missing(into: &mut Slots, incoming: Slots) {
    for (key, value) in incoming {
        into.entry(key).or_insert(value);
    }
}

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["“]([^"”]{1,120})["”]"#).unwrap());
static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfor\s+(\d+(?:\.\d+)?|an?|one|two|three|four|half\s+an?)\s+(hours?|hrs?|minutes?|mins?)\b")
        .unwrap()
});
static ATTENDEES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bwith\s+([A-Z][a-z]+(?:(?:\s*,\s*|\s+and\s+)[A-Z][a-z]+)*)").unwrap()
});
static NAMED_RECIPIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:\b(?:e-?mail|message|write to|reply to)\s+)([A-Z][a-z]+(?:\s+and\s+[A-Z][a-z]+)*)")
        .unwrap()
});
static RECURRENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:every\s+(day|week|month|year|weekday|monday|tuesday|wednesday|thursday|friday|saturday|sunday)|(daily|weekly|monthly|yearly|annually))\b")
        .unwrap()
});
static PRIORITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(urgent|urgently|important|asap|high priority|low priority)\b").unwrap()
});
static LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:at|in)\s+(?:the\s+)?([A-Z][\w']*(?:\s+[A-Z][\w']*)*)").unwrap()
});
static NOTE_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:take a note|make a note|add a note|write a note|jot down|write down|note down|note)(?:\s+that)?\s*[:,-]?\s+(.+)$")
        .unwrap()
});
static REMINDER_TOPIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:remind me|don't let me forget|do not let me forget)\s+(?:to|about|that)?\s*(.+)$")
        .unwrap()
});
static EMAIL_SUBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\babout\s+(.+?)(?:\s+(?:saying|that says|to say)\b|$)").unwrap()
});
static EMAIL_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:saying|that says|to say)\s+(.+)$").unwrap());
static TITLE_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(for\s+\S+\s+(?:hours?|hrs?|minutes?|mins?)|please|can you|could you|would you|i want to|i'd like to|schedule|set up|book|arrange|add|put|create|new|an?|the|to|on|for|my|calendar|diary|event)\b")
        .unwrap()
});
static WITH_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bwith\s+[A-Z][a-z]+(?:(?:\s*,\s*|\s+and\s+)[A-Z][a-z]+)*").unwrap());

const MONTH_AND_DAY_NAMES: [&str; 19] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday",
    "Saturday", "Sunday",
];

fn single(key: &str, value: impl Into<SlotValue>) -> Slots {
    let mut slots = Slots::new();
    slots.insert(key.to_owned(), value.into());
    slots
}

fn is_intent(intent: &Intent, names: &[&str]) -> bool {
    names.contains(&intent.as_str())
}

fn tidy(fragment: &str) -> String {
    fragment
        .trim()
        .trim_end_matches(['.', '!', '?', ','])
        .trim()
        .to_owned()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `datetime` when a clock time is known, otherwise a date-only `date`.
fn extract_datetime(text: &str, _intent: &Intent, now: NaiveDateTime) -> Slots {
    match parse_moment(text, now) {
        Some(moment) => match moment.datetime() {
            Some(datetime) => single("datetime", datetime),
            None => single("date", moment.date.format("%Y-%m-%d").to_string()),
        },
        None => Slots::new(),
    }
}

fn extract_duration(text: &str, _intent: &Intent, _now: NaiveDateTime) -> Slots {
    let Some(captures) = DURATION.captures(text) else {
        return Slots::new();
    };
    let amount = captures.get(1).map_or("", |m| m.as_str()).to_lowercase();
    let unit = captures.get(2).map_or("", |m| m.as_str()).to_lowercase();
    let quantity = match amount.as_str() {
        "a" | "an" | "one" => 1.0,
        "two" => 2.0,
        "three" => 3.0,
        "four" => 4.0,
        half if half.starts_with("half") => 0.5,
        digits => digits.parse::<f64>().unwrap_or(0.0),
    };
    let minutes = if unit.starts_with('h') {
        quantity * 60.0
    } else {
        quantity
    };
    if minutes <= 0.0 {
        return Slots::new();
    }
    single("duration_minutes", minutes.round() as i64)
}

fn extract_quoted_title(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    let Some(captures) = QUOTED.captures(text) else {
        return Slots::new();
    };
    let title = tidy(captures.get(1).map_or("", |m| m.as_str()));
    if title.is_empty() {
        return Slots::new();
    }
    let key = if intent.as_str() == Intent::SEND_EMAIL {
        "subject"
    } else {
        "title"
    };
    single(key, title)
}

fn extract_email_addresses(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    let key = match intent.as_str() {
        Intent::SEND_EMAIL => "recipients",
        Intent::CREATE_EVENT => "attendees",
        _ => return Slots::new(),
    };
    let addresses: Vec<String> = EMAIL
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if addresses.is_empty() {
        return Slots::new();
    }
    single(key, addresses)
}

fn split_names(names: &str) -> Vec<String> {
    names
        .split([','])
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|name| !name.is_empty() && !MONTH_AND_DAY_NAMES.contains(name))
        .map(str::to_owned)
        .collect()
}

fn extract_attendees(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::CREATE_EVENT]) {
        return Slots::new();
    }
    let Some(captures) = ATTENDEES.captures(text) else {
        return Slots::new();
    };
    let names = split_names(captures.get(1).map_or("", |m| m.as_str()));
    if names.is_empty() {
        return Slots::new();
    }
    single("attendees", names)
}

fn extract_named_recipients(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::SEND_EMAIL]) {
        return Slots::new();
    }
    let Some(captures) = NAMED_RECIPIENT.captures(text) else {
        return Slots::new();
    };
    let names = split_names(captures.get(1).map_or("", |m| m.as_str()));
    if names.is_empty() {
        return Slots::new();
    }
    single("recipients", names)
}

fn extract_recurrence(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::CREATE_EVENT, Intent::CREATE_REMINDER]) {
        return Slots::new();
    }
    let Some(captures) = RECURRENCE.captures(text) else {
        return Slots::new();
    };
    let recurring = if let Some(every) = captures.get(1) {
        match every.as_str().to_lowercase().as_str() {
            "day" => "daily".to_owned(),
            "week" => "weekly".to_owned(),
            "month" => "monthly".to_owned(),
            "year" => "yearly".to_owned(),
            "weekday" => "weekdays".to_owned(),
            weekday => format!("every {weekday}"),
        }
    } else {
        match captures.get(2).map(|m| m.as_str().to_lowercase()) {
            Some(word) if word == "annually" => "yearly".to_owned(),
            Some(word) => word,
            None => return Slots::new(),
        }
    };
    single("recurring", recurring)
}

fn extract_priority(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::CREATE_REMINDER]) {
        return Slots::new();
    }
    let Some(found) = PRIORITY.find(text) else {
        return Slots::new();
    };
    let priority = if found.as_str().to_lowercase().starts_with("low") {
        "low"
    } else {
        "high"
    };
    single("priority", priority)
}

fn extract_location(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::CREATE_EVENT]) {
        return Slots::new();
    }
    LOCATION
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str().trim())
        .find(|place| !MONTH_AND_DAY_NAMES.iter().any(|name| place.starts_with(name)))
        .map_or_else(Slots::new, |place| single("location", place))
}

fn extract_note_body(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::CREATE_NOTE]) {
        return Slots::new();
    }
    let body = NOTE_BODY
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| tidy(m.as_str()))
        .filter(|body| !body.is_empty());
    body.map_or_else(Slots::new, |body| single("body", body))
}

fn extract_reminder_topic(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::CREATE_REMINDER]) {
        return Slots::new();
    }
    let topic = REMINDER_TOPIC
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| tidy(&strip_temporal(&RECURRENCE.replace_all(m.as_str(), " "))))
        .filter(|topic| !topic.is_empty());
    topic.map_or_else(Slots::new, |topic| single("title", capitalize(&topic)))
}

fn extract_email_parts(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::SEND_EMAIL]) {
        return Slots::new();
    }
    let mut slots = Slots::new();
    if let Some(subject) = EMAIL_SUBJECT.captures(text).and_then(|c| c.get(1)) {
        let subject = tidy(subject.as_str());
        if !subject.is_empty() {
            slots.insert("subject".to_owned(), SlotValue::from(capitalize(&subject)));
        }
    }
    if let Some(body) = EMAIL_BODY.captures(text).and_then(|c| c.get(1)) {
        let body = tidy(body.as_str());
        if !body.is_empty() {
            slots.insert("body".to_owned(), SlotValue::from(body));
        }
    }
    slots
}

/// A bare "meeting" lasts an hour, a "call" half an hour.
fn default_duration(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    if !is_intent(intent, &[Intent::CREATE_EVENT]) {
        return Slots::new();
    }
    let lowered = text.to_lowercase();
    if lowered.contains("call") {
        single("duration_minutes", 30_i64)
    } else if lowered.contains("meeting") {
        single("duration_minutes", 60_i64)
    } else {
        Slots::new()
    }
}

/// Title from whatever remains once trigger words, times and names are gone.
fn default_title(text: &str, intent: &Intent, _now: NaiveDateTime) -> Slots {
    let fallback = match intent.as_str() {
        Intent::CREATE_EVENT => {
            let lowered = text.to_lowercase();
            if lowered.contains("call") {
                "Call"
            } else if lowered.contains("meeting") {
                "Meeting"
            } else {
                "Event"
            }
        }
        Intent::CREATE_REMINDER => "Reminder",
        Intent::CREATE_NOTE => "Note",
        _ => return Slots::new(),
    };

    let without_names = WITH_CLAUSE.replace_all(text, " ");
    let without_place = LOCATION.replace_all(&without_names, " ");
    let without_time = strip_temporal(&without_place);
    let without_noise = TITLE_NOISE.replace_all(&without_time, " ");
    let cleaned = tidy(
        &without_noise
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
    );
    let title = if cleaned.is_empty() {
        fallback.to_owned()
    } else {
        capitalize(&cleaned)
    };
    single("title", title)
}

/// The built-in rule set, in declaration (and therefore merge) order.
pub fn default_rules() -> Vec<SlotRule> {
    vec![
        SlotRule::new("datetime", Tier::Deterministic, extract_datetime),
        SlotRule::new("duration", Tier::Deterministic, extract_duration),
        SlotRule::new("quoted_title", Tier::Deterministic, extract_quoted_title),
        SlotRule::new("email_addresses", Tier::Deterministic, extract_email_addresses),
        SlotRule::new("named_recipients", Tier::Deterministic, extract_named_recipients),
        SlotRule::new("attendees", Tier::Deterministic, extract_attendees),
        SlotRule::new("recurrence", Tier::Deterministic, extract_recurrence),
        SlotRule::new("priority", Tier::Deterministic, extract_priority),
        SlotRule::new("location", Tier::Deterministic, extract_location),
        SlotRule::new("note_body", Tier::Deterministic, extract_note_body),
        SlotRule::new("reminder_topic", Tier::Deterministic, extract_reminder_topic),
        SlotRule::new("email_parts", Tier::Deterministic, extract_email_parts),
        SlotRule::new("default_duration", Tier::IntentDefault, default_duration),
        SlotRule::new("default_title", Tier::IntentDefault, default_title),
    ]
}

/// Parses a model reply into slots. Tolerates prose or code fences around
/// the first JSON object; anything else is an [`AssistantError::ExtractionFailure`].
pub fn parse_model_slots(content: &str) -> AssistantResult<Slots> {
    let start = content.find('{');
    let end = content.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(AssistantError::ExtractionFailure(
            "model reply holds no JSON object".to_owned(),
        ));
    };
    if end < start {
        return Err(AssistantError::ExtractionFailure(
            "model reply holds no JSON object".to_owned(),
        ));
    }

    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&content[start..=end])
            .map_err(|error| AssistantError::ExtractionFailure(error.to_string()))?;
    Ok(object
        .iter()
        .filter_map(|(key, value)| {
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            SlotValue::from_json(value).map(|value| (key.to_owned(), value))
        })
        .collect())
}

/// A model `datetime` must land on the day the rules already resolved.
fn drop_off_day_datetime(slots: &Slots, model_slots: &mut Slots) {
    if slots.contains_key("datetime") {
        return;
    }
    let Some(day) = slots
        .get("date")
        .and_then(SlotValue::as_text)
        .and_then(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok())
    else {
        return;
    };
    let Some(modelled) = model_slots.get("datetime") else {
        return;
    };
    if modelled.as_datetime().map(|at| at.date()) != Some(day) {
        debug!(%day, "model datetime on another day dropped");
        model_slots.shift_remove("datetime");
    }
}

pub struct SlotExtractor {
    rules: Vec<SlotRule>,
    completion: Option<Arc<dyn CompletionPort>>,
    clock: Arc<dyn Clock>,
    min_slots_before_model: usize,
}

impl SlotExtractor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: default_rules(),
            completion: None,
            clock,
            min_slots_before_model: 2,
        }
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionPort>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_rules(mut self, rules: Vec<SlotRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_min_slots_before_model(mut self, min_slots: usize) -> Self {
        self.min_slots_before_model = min_slots;
        self
    }

    pub fn rules(&self) -> &[SlotRule] {
        &self.rules
    }

    /// Runs the rules by tier (declaration order within a tier); the first
    /// rule to produce a key owns it.
    pub fn extract_deterministic(&self, text: &str, intent: &Intent, now: NaiveDateTime) -> Slots {
        let mut ordered: Vec<&SlotRule> = self.rules.iter().collect();
        ordered.sort_by_key(|rule| rule.tier);

        let mut slots = Slots::new();
        for rule in ordered {
            let produced = (rule.apply)(text, intent, now);
            if !produced.is_empty() {
                debug!(rule = rule.name, keys = produced.len(), "slot rule fired");
            }
            merge_missing(&mut slots, produced);
        }
        slots
    }

    pub async fn extract_slots(&self, text: &str, intent: &Intent) -> Slots {
        self.extract_slots_at(text, intent, self.clock.now()).await
    }

    #[instrument(skip(self, text, intent, now), fields(intent = %intent))]
    pub async fn extract_slots_at(&self, text: &str, intent: &Intent, now: NaiveDateTime) -> Slots {
        let mut slots = self.extract_deterministic(text, intent, now);
        if slots.len() >= self.min_slots_before_model || intent.is_unknown() {
            return slots;
        }
        let Some(completion) = &self.completion else {
            return slots;
        };

        let request = prompts::slot_extraction_request(text, intent, now);
        let modelled = match completion.complete(request).await {
            Ok(response) => parse_model_slots(&response.content),
            Err(error) => Err(AssistantError::from(error)),
        };
        match modelled {
            Ok(mut model_slots) => {
                drop_off_day_datetime(&slots, &mut model_slots);
                debug!(model_keys = model_slots.len(), "model slots merged");
                merge_missing(&mut slots, model_slots);
            }
            Err(error) => warn!(%error, "slot extraction model pass dropped"),
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parley_protocol::{CompletionError, CompletionRequest, CompletionResponse, FixedClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .and_then(|d| d.and_hms_opt(10, 30, 0))
            .unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, d)
            .and_then(|date| date.and_hms_opt(h, m, 0))
            .unwrap()
    }

    struct ScriptedPort {
        reply: Result<String, CompletionError>,
        calls: AtomicUsize,
    }

    impl ScriptedPort {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_owned()),
                calls: AtomicUsize::new(0),
            })
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
                elapsed_ms: 0,
            })
        }
    }

    fn extractor() -> SlotExtractor {
        SlotExtractor::new(Arc::new(FixedClock(now())))
    }

    #[test]
    fn event_slots_from_deterministic_rules() {
        let slots = extractor().extract_deterministic(
            "Schedule a meeting with Ana and Ben tomorrow at 3pm at Blue Bottle",
            &Intent::new("create_event"),
            now(),
        );
        assert_eq!(slots["datetime"].as_datetime(), Some(at(20, 15, 0)));
        assert_eq!(
            slots["attendees"].as_list(),
            Some(&["Ana".to_owned(), "Ben".to_owned()][..])
        );
        assert_eq!(slots["location"].as_text(), Some("Blue Bottle"));
        assert_eq!(slots["duration_minutes"].as_integer(), Some(60));
        assert_eq!(slots["title"].as_text(), Some("Meeting"));
    }

    #[test]
    fn explicit_duration_beats_intent_default() {
        let slots = extractor().extract_deterministic(
            "call with Sam on Friday at 10am for 2 hours",
            &Intent::new("create_event"),
            now(),
        );
        assert_eq!(slots["duration_minutes"].as_integer(), Some(120));
        assert_eq!(slots["datetime"].as_datetime(), Some(at(23, 10, 0)));
    }

    #[test]
    fn date_only_events_keep_the_time_open() {
        let slots = extractor().extract_deterministic(
            "Dinner with Mia tomorrow",
            &Intent::new("create_event"),
            now(),
        );
        assert!(!slots.contains_key("datetime"));
        assert_eq!(slots["date"].as_text(), Some("2026-10-20"));
        assert_eq!(slots["title"].as_text(), Some("Dinner"));
    }

    #[test]
    fn reminder_topic_priority_and_recurrence() {
        let slots = extractor().extract_deterministic(
            "Remind me to take my vitamins every day at 8am, it's important",
            &Intent::new("create_reminder"),
            now(),
        );
        assert_eq!(slots["recurring"].as_text(), Some("daily"));
        assert_eq!(slots["priority"].as_text(), Some("high"));
        assert_eq!(slots["datetime"].as_datetime(), Some(at(20, 8, 0)));
        assert_eq!(
            slots["title"].as_text(),
            Some("Take my vitamins, it's important")
        );
    }

    #[test]
    fn email_recipients_subject_and_body() {
        let slots = extractor().extract_deterministic(
            "Email ana@example.com about the budget saying numbers look good",
            &Intent::new("send_email"),
            now(),
        );
        assert_eq!(
            slots["recipients"].as_list(),
            Some(&["ana@example.com".to_owned()][..])
        );
        assert_eq!(slots["subject"].as_text(), Some("The budget"));
        assert_eq!(slots["body"].as_text(), Some("numbers look good"));

        let named = extractor().extract_deterministic(
            "email Bob and Carol",
            &Intent::new("send_email"),
            now(),
        );
        assert_eq!(
            named["recipients"].as_list(),
            Some(&["Bob".to_owned(), "Carol".to_owned()][..])
        );
    }

    #[test]
    fn note_body_and_quoted_title() {
        let slots = extractor().extract_deterministic(
            r#"Take a note: "Wifi" the password is hunter2."#,
            &Intent::new("create_note"),
            now(),
        );
        assert_eq!(slots["title"].as_text(), Some("Wifi"));
        assert_eq!(slots["body"].as_text(), Some(r#""Wifi" the password is hunter2"#));
    }

    #[test]
    fn first_writer_wins_across_tiers() {
        fn late(_: &str, _: &Intent, _: NaiveDateTime) -> Slots {
            single("title", "from default")
        }
        fn early(_: &str, _: &Intent, _: NaiveDateTime) -> Slots {
            single("title", "from rule")
        }
        let slots = extractor()
            .with_rules(vec![
                SlotRule::new("late", Tier::IntentDefault, late),
                SlotRule::new("early", Tier::Deterministic, early),
            ])
            .extract_deterministic("x", &Intent::new("create_note"), now());
        assert_eq!(slots["title"].as_text(), Some("from rule"));
    }

    #[tokio::test]
    async fn model_fills_gaps_but_never_overwrites_datetime() -> Result<()> {
        let port = ScriptedPort::replying(
            r#"Sure! {"datetime": "2030-01-01T09:00:00", "location": "Room 4", "title": ""}"#,
        );
        let extractor = extractor()
            .with_completion(port.clone())
            .with_rules(vec![SlotRule::new("datetime", Tier::Deterministic, extract_datetime)]);

        let slots = extractor
            .extract_slots("sync tomorrow at 4pm", &Intent::new("create_event"))
            .await;
        assert_eq!(port.calls.load(Ordering::SeqCst), 1);
        assert_eq!(slots["datetime"].as_datetime(), Some(at(20, 16, 0)));
        assert_eq!(slots["location"].as_text(), Some("Room 4"));
        assert!(!slots.contains_key("title"));
        Ok(())
    }

    #[tokio::test]
    async fn model_time_must_fall_on_the_resolved_day() {
        let rules = || vec![SlotRule::new("datetime", Tier::Deterministic, extract_datetime)];

        let off_day = ScriptedPort::replying(r#"{"datetime": "2030-01-01T19:00:00"}"#);
        let slots = extractor()
            .with_completion(off_day)
            .with_rules(rules())
            .extract_slots("dinner tomorrow", &Intent::new("create_event"))
            .await;
        assert_eq!(slots["date"].as_text(), Some("2026-10-20"));
        assert!(!slots.contains_key("datetime"));

        let same_day = ScriptedPort::replying(r#"{"datetime": "2026-10-20T19:00:00"}"#);
        let slots = extractor()
            .with_completion(same_day)
            .with_rules(rules())
            .extract_slots("dinner tomorrow", &Intent::new("create_event"))
            .await;
        assert_eq!(slots["datetime"].as_datetime(), Some(at(20, 19, 0)));
    }

    #[tokio::test]
    async fn model_is_skipped_when_enough_slots_were_found() {
        let port = ScriptedPort::replying(r#"{"location": "Room 4"}"#);
        let slots = extractor()
            .with_completion(port.clone())
            .extract_slots("meeting tomorrow at 4pm", &Intent::new("create_event"))
            .await;
        assert_eq!(port.calls.load(Ordering::SeqCst), 0);
        assert!(!slots.contains_key("location"));
    }

    #[tokio::test]
    async fn malformed_or_failed_model_output_yields_no_model_slots() {
        let garbage = ScriptedPort::replying("I cannot help with that");
        let slots = extractor()
            .with_completion(garbage)
            .with_rules(Vec::new())
            .extract_slots("do the thing", &Intent::new("create_note"))
            .await;
        assert!(slots.is_empty());

        let failing = Arc::new(ScriptedPort {
            reply: Err(CompletionError::Timeout { elapsed_ms: 15_000 }),
            calls: AtomicUsize::new(0),
        });
        let slots = extractor()
            .with_completion(failing)
            .with_rules(Vec::new())
            .extract_slots("do the thing", &Intent::new("create_note"))
            .await;
        assert!(slots.is_empty());
    }

    #[test]
    fn parse_model_slots_rejects_non_objects() {
        assert!(parse_model_slots("[1, 2]").is_err());
        assert!(parse_model_slots("{broken").is_err());
        let slots = parse_model_slots("```json\n{\"duration_minutes\": 45, \"x\": null}\n```")
            .unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots["duration_minutes"].as_integer(), Some(45));
    }
}
