//! # parley-protocol: shared contract for the assistant pipeline
//!
//! This crate defines the data model, error taxonomy, and boundary ports
//! that every parley crate depends on.
//!
//! It carries no async runtime or HTTP dependencies.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (SessionId, UserId, EventId)
//! - [`intent`]: Intent, SlotValue, Slots, Provenance, ClassificationResult
//! - [`decision`]: DecisionKind and Decision
//! - [`session`]: Turn, WorkingMemory, SessionContext
//! - [`correction`]: CorrectionRecord, PatternMemoryEntry
//! - [`action`]: ActionResult, DomainRecord, Validation
//! - [`ports`]: Completion backend, domain services, and clock ports
//! - [`wire`]: Inbound/outbound wire shapes
//! - [`error`]: AssistantError, CompletionError, ServiceError

pub mod action;
pub mod correction;
pub mod decision;
pub mod error;
pub mod ids;
pub mod intent;
pub mod ports;
pub mod session;
pub mod wire;

// Re-export the most commonly used types at the crate root.
pub use action::{ActionResult, DomainRecord, Validation};
pub use correction::{CorrectionRecord, PatternMemoryEntry, normalize_text};
pub use decision::{Decision, DecisionKind};
pub use error::{AssistantError, AssistantResult, CompletionError, ServiceError};
pub use ids::{EventId, SessionId, UserId};
pub use intent::{ClassificationResult, Intent, Provenance, SlotValue, Slots};
pub use ports::{
    Clock, CompletionPort, CompletionRequest, CompletionResponse, DomainService, FixedClock,
    ResponseFormat, SystemClock,
};
pub use session::{PendingAction, Role, SessionContext, Turn, TurnMetadata, WorkingMemory};
pub use wire::{AssistRequest, AssistResponse, CorrectionRequest, Utterance};
