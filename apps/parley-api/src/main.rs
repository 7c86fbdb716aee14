use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_stream::stream;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use futures_util::Stream;
use parley_events::EventRecord;
use parley_kernel::{Assistant, AssistantBuilder, CompletionConfig, PipelineConfig, PolicyKind};
use parley_protocol::{
    AssistRequest, AssistResponse, AssistantError, CorrectionRecord, CorrectionRequest, Decision,
    PatternMemoryEntry, SessionContext, SessionId, Utterance,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod openapi;

use crate::openapi::openapi_spec;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Fixed,
    Semantic,
}

impl From<PolicyArg> for PolicyKind {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Fixed => PolicyKind::Fixed,
            PolicyArg::Semantic => PolicyKind::Semantic,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "parley-api")]
#[command(about = "parley assistant HTTP API")]
struct Cli {
    /// JSON pipeline config; flags below override it.
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "PARLEY_LISTEN", default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
    /// Persist sessions, patterns and the journal here instead of in memory.
    #[arg(long, env = "PARLEY_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,
    #[arg(long, env = "PARLEY_POLICY", value_enum)]
    policy: Option<PolicyArg>,
    #[arg(long, env = "PARLEY_MODEL")]
    model: Option<String>,
    #[arg(long, env = "PARLEY_OLLAMA_URL")]
    ollama_url: Option<String>,
    /// Run on rules and pattern memory only.
    #[arg(long, env = "PARLEY_NO_MODEL")]
    no_model: bool,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(root) = &self.storage_root {
            config.storage_root = Some(root.clone());
        }
        if let Some(policy) = self.policy {
            config.policy.kind = policy.into();
        }
        if self.no_model {
            config.completion = None;
        } else if self.model.is_some() || self.ollama_url.is_some() {
            let completion = config
                .completion
                .get_or_insert_with(CompletionConfig::default);
            if let Some(model) = &self.model {
                completion.model = model.clone();
            }
            if let Some(base_url) = &self.ollama_url {
                completion.base_url = base_url.clone();
            }
        }
        Ok(config)
    }
}

#[derive(Clone)]
struct AppState {
    assistant: Assistant,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CorrectionResponse {
    decision: Decision,
    response: AssistResponse,
}

#[derive(Debug, Deserialize, Default)]
struct EventListQuery {
    from_sequence: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EventListResponse {
    session_id: SessionId,
    from_sequence: u64,
    events: Vec<EventRecord>,
}

#[derive(Debug, Deserialize, Default)]
struct EventStreamQuery {
    cursor: Option<u64>,
    replay_limit: Option<usize>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<AssistantError> for ApiError {
    fn from(error: AssistantError) -> Self {
        let status = match &error {
            AssistantError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AssistantError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(%error, "request failed");
        }
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config()?;
    let assistant = AssistantBuilder::from_config(config).build().await?;
    info!(policy = assistant.policy_name(), "assistant ready");

    let app = router(AppState { assistant });

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, "parley-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/openapi.json", get(openapi_json))
        .route("/assist", post(assist))
        .route(
            "/sessions/{session_id}",
            get(get_session).delete(delete_session),
        )
        .route("/sessions/{session_id}/corrections", post(apply_correction))
        .route("/sessions/{session_id}/events", get(list_events))
        .route("/sessions/{session_id}/events/stream", get(stream_events))
        .route("/patterns", get(list_patterns))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "parley-api",
        "policy": state.assistant.policy_name(),
    }))
}

async fn openapi_json() -> Json<serde_json::Value> {
    Json(openapi_spec())
}

async fn assist(
    State(state): State<AppState>,
    Json(request): Json<AssistRequest>,
) -> ApiResult<Json<AssistResponse>> {
    let response = state.assistant.process(Utterance::from(request)).await?;
    Ok(Json(response))
}

async fn apply_correction(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<CorrectionRequest>,
) -> ApiResult<Json<CorrectionResponse>> {
    let session_id = parse_session_id(&session_id)?;
    let (decision, response) = state
        .assistant
        .apply_correction(&session_id, CorrectionRecord::from(request))
        .await?;
    Ok(Json(CorrectionResponse { decision, response }))
}

async fn get_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SessionContext>> {
    let session_id = parse_session_id(&session_id)?;
    state
        .assistant
        .session(&session_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}")))
}

async fn delete_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    let session_id = parse_session_id(&session_id)?;
    if state.assistant.clear_session(&session_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("session not found: {session_id}")))
    }
}

async fn list_patterns(State(state): State<AppState>) -> Json<Vec<PatternMemoryEntry>> {
    Json(state.assistant.patterns())
}

async fn list_events(
    Path(session_id): Path<String>,
    Query(query): Query<EventListQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<EventListResponse>> {
    let session_id = parse_session_id(&session_id)?;
    let from_sequence = query.from_sequence.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(200).clamp(1, 5000);

    let events = state
        .assistant
        .read_events(&session_id, from_sequence, limit)
        .await?;

    Ok(Json(EventListResponse {
        session_id,
        from_sequence,
        events,
    }))
}

async fn stream_events(
    Path(session_id): Path<String>,
    Query(query): Query<EventStreamQuery>,
    State(state): State<AppState>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session_id = parse_session_id(&session_id)?;
    let mut next_sequence = query.cursor.map_or(1, |cursor| cursor.saturating_add(1));
    let replay_limit = query.replay_limit.unwrap_or(500).clamp(1, 5000);

    // Subscribe before replaying so nothing lands between the two.
    let mut subscription = state.assistant.subscribe_events();
    let replay_events = state
        .assistant
        .read_events(&session_id, next_sequence, replay_limit)
        .await?;

    if let Some(last_event) = replay_events.last() {
        next_sequence = last_event.sequence.saturating_add(1);
    }

    let stream = stream! {
        for event in replay_events {
            yield Ok(as_sse_event("pipeline.event", &event));
        }

        let mut expected_sequence = next_sequence;
        loop {
            match subscription.recv().await {
                Ok(event) => {
                    if event.session_id != session_id || event.sequence < expected_sequence {
                        continue;
                    }
                    expected_sequence = event.sequence.saturating_add(1);
                    yield Ok(as_sse_event("pipeline.event", &event));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    let lag_payload = json!({ "skipped": skipped }).to_string();
                    yield Ok(Event::default().event("stream.lagged").data(lag_payload));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn parse_session_id(raw: &str) -> ApiResult<SessionId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("session id must not be blank"));
    }
    Ok(SessionId::from_string(trimmed))
}

fn as_sse_event(event_name: &str, event: &EventRecord) -> Event {
    let payload = serde_json::to_string(event)
        .unwrap_or_else(|error| json!({ "error": error.to_string() }).to_string());
    Event::default()
        .id(event.sequence.to_string())
        .event(event_name)
        .data(payload)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
