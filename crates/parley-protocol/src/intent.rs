//! Intents, slots, and classification results.

use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The categorical action an utterance requests.
///
/// Intents form an open set: the well-known names below are what the rule
/// classifier and the dispatcher understand, but any lower-case name can be
/// carried through corrections and pattern memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intent(String);

impl Intent {
    pub const CREATE_EVENT: &'static str = "create_event";
    pub const CREATE_REMINDER: &'static str = "create_reminder";
    pub const CREATE_NOTE: &'static str = "create_note";
    pub const SEND_EMAIL: &'static str = "send_email";
    pub const LIST_EVENTS: &'static str = "list_events";
    pub const UNKNOWN: &'static str = "unknown";

    /// Intents the pipeline can classify into and dispatch.
    pub const KNOWN: [&'static str; 5] = [
        Self::CREATE_EVENT,
        Self::CREATE_REMINDER,
        Self::CREATE_NOTE,
        Self::SEND_EMAIL,
        Self::LIST_EVENTS,
    ];

    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim().to_lowercase();
        if name.is_empty() {
            return Self::unknown();
        }
        Self(name)
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_owned())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    pub fn is_known(&self) -> bool {
        Self::KNOWN.contains(&self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Intent {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Intent {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A typed slot value.
///
/// Serialized untagged so the wire carries plain JSON scalars. Datetimes are
/// naive local wall-clock values rendered as ISO-8601.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    DateTime(NaiveDateTime),
    Text(String),
    List(Vec<String>),
}

impl SlotValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    /// Human-readable rendering used in responses.
    pub fn render(&self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::DateTime(value) => value.format("%A %B %-d at %-I:%M %p").to_string(),
            Self::Text(value) => value.clone(),
            Self::List(values) => values.join(", "),
        }
    }

    /// Lenient conversion from model-produced JSON.
    ///
    /// Nulls, objects, and empty values yield `None`; strings that parse as a
    /// datetime become [`SlotValue::DateTime`].
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Bool(flag) => Some(Self::Bool(*flag)),
            Value::Number(number) => number
                .as_i64()
                .map(Self::Integer)
                .or_else(|| number.as_f64().map(Self::Float)),
            Value::String(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                Some(parse_datetime_str(text).map_or_else(|| Self::Text(text.to_owned()), Self::DateTime))
            }
            Value::Array(items) => {
                let values: Vec<String> = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(text) if !text.trim().is_empty() => {
                            Some(text.trim().to_owned())
                        }
                        Value::Number(number) => Some(number.to_string()),
                        _ => None,
                    })
                    .collect();
                (!values.is_empty()).then_some(Self::List(values))
            }
            Value::Null | Value::Object(_) => None,
        }
    }
}

fn parse_datetime_str(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|parsed| parsed.naive_local())
        })
}

impl From<&str> for SlotValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SlotValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDateTime> for SlotValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<i64> for SlotValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for SlotValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for SlotValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Ordered slot map: field name → typed value.
pub type Slots = IndexMap<String, SlotValue>;

/// Which subsystem produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Rule,
    Model,
    PatternMemory,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Model => "model",
            Self::PatternMemory => "pattern-memory",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of intent classification (and, once slots are attached, of the
/// understanding stage as a whole).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub confidence: f32,
    #[serde(default)]
    pub slots: Slots,
    pub provenance: Provenance,
    /// Set when more than one intent scored close to the winner.
    #[serde(default)]
    pub ambiguous: bool,
}

impl ClassificationResult {
    pub fn new(intent: Intent, confidence: f32, provenance: Provenance) -> Self {
        Self {
            intent,
            confidence: clamp_confidence(confidence),
            slots: Slots::new(),
            provenance,
            ambiguous: false,
        }
    }

    /// `unknown` at confidence 0, attributed to the subsystem that gave up.
    pub fn unknown(provenance: Provenance) -> Self {
        Self::new(Intent::unknown(), 0.0, provenance)
    }

    pub fn with_slots(mut self, slots: Slots) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_ambiguity(mut self, ambiguous: bool) -> Self {
        self.ambiguous = ambiguous;
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.intent.is_unknown()
    }
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
