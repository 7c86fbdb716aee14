//! Action results and the domain-service record shapes.

use crate::intent::Slots;
use serde::{Deserialize, Serialize};

/// Outcome of dispatching a resolved intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Text suitable for speech synthesis (no markup, short sentences).
    pub spoken_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
}

impl ActionResult {
    pub fn succeeded(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: true,
            spoken_response: message.clone(),
            message,
            data: None,
            follow_up: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            spoken_response: message.clone(),
            message,
            data: None,
            follow_up: None,
        }
    }

    pub fn with_spoken(mut self, spoken: impl Into<String>) -> Self {
        self.spoken_response = spoken.into();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_follow_up(mut self, follow_up: impl Into<String>) -> Self {
        self.follow_up = Some(follow_up.into());
        self
    }
}

/// What a domain service returns from `create`: its id plus echoed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Slots,
}

/// Pre-dispatch validation verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}
