//! Completion backend adapters.
//!
//! - [`OllamaCompletionClient`] talks to an Ollama-compatible `/api/generate`
//!   endpoint with a hard per-call timeout and bounded retries.
//! - [`CachedCompletion`] is a bounded LRU in front of any
//!   [`CompletionPort`](parley_protocol::CompletionPort). It is a pure
//!   performance layer and never stands in for pattern memory.
//! - [`prompts`] holds the classification and slot-extraction templates.

mod cache;
mod ollama;
pub mod prompts;

pub use cache::{CachedCompletion, DEFAULT_CACHE_CAPACITY};
pub use ollama::{CompletionConfig, OllamaCompletionClient};
