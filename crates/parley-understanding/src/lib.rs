//! Intent understanding: what the user wants and with which fields.
//!
//! - [`IntentClassifier`] consults pattern memory, then the keyword
//!   [`RuleClassifier`], then the completion backend, and never fails.
//! - [`SlotExtractor`] merges ordered [`SlotRule`]s by precedence tier and
//!   asks the model only to fill gaps.
//! - [`datetime`] resolves relative and explicit dates against a clock.

mod classifier;
pub mod datetime;
mod rules;
mod slots;

pub use classifier::{Classified, ClassifierConfig, IntentClassifier};
pub use rules::{AMBIGUITY_MARGIN, RuleClassifier};
pub use slots::{SlotExtractor, SlotFn, SlotRule, Tier, default_rules, merge_missing, parse_model_slots};
