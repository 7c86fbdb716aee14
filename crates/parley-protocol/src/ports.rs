//! Boundary ports between the pipeline and its external collaborators.
//!
//! These traits define the only allowed runtime boundary between the
//! pipeline and external implementations (language-model backends, domain
//! services, wall clock). Persistence ports live next to their stores in
//! `parley-memory`.
//!
//! Object-safety note: traits use `async-trait` for async dyn-dispatch.

use crate::action::{DomainRecord, Validation};
use crate::error::{CompletionError, ServiceError};
use crate::intent::Slots;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.1,
            max_tokens: 256,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model_id: String,
    pub elapsed_ms: u64,
}

/// Opaque language-model completion backend.
#[async_trait]
pub trait CompletionPort: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// A calendar/reminder/note/email collaborator.
#[async_trait]
pub trait DomainService: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self, fields: &Slots) -> Result<DomainRecord, ServiceError>;

    /// Checked before dispatch; the default accepts everything.
    async fn validate(&self, _slots: &Slots) -> Validation {
        Validation::ok()
    }

    async fn list(&self) -> Result<Vec<DomainRecord>, ServiceError> {
        Ok(Vec::new())
    }
}

/// Wall-clock source for relative date resolution and past-date checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
