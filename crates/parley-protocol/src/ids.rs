//! Typed ID types for the assistant.
//!
//! IDs are opaque String wrappers (serde-transparent). Session ids arrive
//! from callers as arbitrary stable keys, so the pipeline never assumes a
//! UUID shape; it only generates UUIDs when the caller omitted one.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Create a new ID using UUID v4 (random).
            pub fn new_uuid() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new_uuid()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Stable key for a conversation session.
    SessionId
);
typed_id!(
    /// Identifier of the end user owning a session.
    UserId
);
typed_id!(
    /// Unique identifier for a journal event.
    EventId
);

impl SessionId {
    /// Use the caller-supplied id when present and non-blank, otherwise mint one.
    pub fn or_generate(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(value) if !value.is_empty() => Self::from_string(value),
            _ => Self::new_uuid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_keeps_caller_value() {
        let id = SessionId::or_generate(Some("  kitchen-speaker "));
        assert_eq!(id.as_str(), "kitchen-speaker");
    }

    #[test]
    fn session_id_generated_when_blank_or_missing() {
        let generated = SessionId::or_generate(Some("   "));
        assert!(uuid::Uuid::parse_str(generated.as_str()).is_ok());
        let generated = SessionId::or_generate(None);
        assert!(uuid::Uuid::parse_str(generated.as_str()).is_ok());
    }

    #[test]
    fn ids_are_serde_transparent() {
        let id = UserId::from_string("u-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u-1\"");
    }
}
