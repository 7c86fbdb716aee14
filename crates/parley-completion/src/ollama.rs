use std::time::Instant;

use async_trait::async_trait;
use parley_protocol::{
    CompletionError, CompletionPort, CompletionRequest, CompletionResponse, ResponseFormat,
};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    /// Extra attempts after the first for unreachable / 5xx failures.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_owned(),
            model: "llama3.2".to_owned(),
            timeout_ms: 15_000,
            max_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
}

/// Completion client for an Ollama-compatible `/api/generate` endpoint.
///
/// Every attempt is bounded by `timeout_ms`; a timeout is returned as
/// [`CompletionError::Timeout`] and is never retried.
#[derive(Debug, Clone)]
pub struct OllamaCompletionClient {
    http: reqwest::Client,
    config: CompletionConfig,
}

impl OllamaCompletionClient {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.config.base_url.trim_end_matches('/'))
    }

    async fn attempt(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let started = Instant::now();
        let body = GenerateRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            system: request.system_prompt.as_deref(),
            stream: false,
            format: match request.response_format {
                ResponseFormat::Json => Some("json"),
                ResponseFormat::Text => None,
            },
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let call = async {
            let response = self
                .http
                .post(self.endpoint())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CompletionError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            response
                .json::<GenerateResponse>()
                .await
                .map_err(|error| CompletionError::Malformed(error.to_string()))
        };

        let limit = Duration::from_millis(self.config.timeout_ms.max(1));
        let generated = match timeout(limit, call).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CompletionError::Timeout {
                    elapsed_ms: elapsed_ms(started),
                });
            }
        };

        Ok(CompletionResponse {
            content: generated.response,
            model_id: generated.model.unwrap_or_else(|| self.config.model.clone()),
            elapsed_ms: elapsed_ms(started),
        })
    }
}

#[async_trait]
impl CompletionPort for OllamaCompletionClient {
    #[instrument(
        skip(self, request),
        fields(
            model = %self.config.model,
            format = ?request.response_format,
            prompt_len = request.prompt.len()
        )
    )]
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(&request).await {
                Ok(response) => {
                    debug!(
                        elapsed_ms = response.elapsed_ms,
                        attempt, "completion finished"
                    );
                    return Ok(response);
                }
                Err(error) if error.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff_ms.saturating_mul(u64::from(attempt));
                    warn!(%error, attempt, backoff_ms = backoff, "retrying completion");
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(error) => {
                    warn!(%error, attempt, "completion failed");
                    return Err(error);
                }
            }
        }
    }
}

fn transport_error(error: reqwest::Error) -> CompletionError {
    if error.is_timeout() {
        CompletionError::Timeout { elapsed_ms: 0 }
    } else if error.is_decode() {
        CompletionError::Malformed(error.to_string())
    } else {
        CompletionError::Unreachable(error.to_string())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
