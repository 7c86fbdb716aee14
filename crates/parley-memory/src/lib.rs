//! Session-scoped conversation state and process-wide pattern memory.

mod context;
mod patterns;
mod session_store;
mod working;

pub use context::{ContextConfig, ContextManager};
pub use patterns::{
    FilePatternStore, InMemoryPatternStore, MIN_SUBSTRING_KEY_LEN, PatternMatch, PatternMemory,
    PatternStore,
};
pub use session_store::{FileSessionStore, InMemorySessionStore, SessionStore};
pub use working::observe_turn;
