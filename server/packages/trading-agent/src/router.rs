//! HTTP surface of the gateway.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use trading_agent_runner::step::{AgentRunner, RunRequest};

use crate::generation::{run_generation, OutboundEvent};
use crate::registry::GenerationRegistry;

pub const SERVICE_NAME: &str = "trading-agent";
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);
const DEFAULT_LOCALE: &str = "tw";

/// Shared state behind every route.
pub struct AppState {
    registry: Arc<GenerationRegistry>,
    runner: Arc<dyn AgentRunner>,
    heartbeat: Duration,
}

impl AppState {
    pub fn new(runner: Arc<dyn AgentRunner>) -> Self {
        Self {
            registry: Arc::new(GenerationRegistry::new()),
            runner,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn registry(&self) -> &Arc<GenerationRegistry> {
        &self.registry
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Please provide {0}")]
    MissingField(&'static str),
    #[error("Error processing request: {0}")]
    Setup(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingField(_) => StatusCode::BAD_REQUEST,
            ApiError::Setup(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/generate", post(post_generate))
        .route("/stop_generation", post(post_stop_generation))
        .route("/active_generations", get(get_active_generations))
        .with_state(Arc::new(state))
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    context: Option<GenerateContext>,
    #[serde(default)]
    locale: Option<String>,
    #[serde(default)]
    user_id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContext {
    #[serde(default)]
    strategy_id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    user_id: Option<Value>,
}

/// Accepts a string or numeric id and canonicalizes it to a string key.
fn identifier_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    }
}

async fn get_health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

async fn post_generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let query = body
        .query
        .filter(|query| !query.is_empty())
        .ok_or(ApiError::MissingField("query"))?;
    let request_id =
        identifier_string(body.user_id.as_ref()).ok_or(ApiError::MissingField("user_id"))?;
    let locale = body.locale.unwrap_or_else(|| DEFAULT_LOCALE.to_string());
    let strategy_id = body.context.and_then(|context| context.strategy_id);

    tracing::info!(
        request_id = %request_id,
        locale = %locale,
        strategy_id = ?strategy_id,
        "generation requested"
    );

    state.registry.start(&request_id);

    let mut run = RunRequest::new(query);
    run.locale = Some(locale);
    let steps = match state.runner.stream_steps(run) {
        Ok(steps) => steps,
        Err(err) => {
            state.registry.clear(&request_id);
            return Err(ApiError::Setup(err.to_string()));
        }
    };

    let events = run_generation(
        Arc::clone(&state.registry),
        steps,
        request_id,
        state.heartbeat,
    )
    .map(|event| Ok::<Event, Infallible>(to_sse_event(event)));

    Ok(Sse::new(events).into_response())
}

fn to_sse_event(event: OutboundEvent) -> Event {
    match event {
        OutboundEvent::Chunk(text) => Event::default().data(json!({ "chunk": text }).to_string()),
        OutboundEvent::Status(text) => Event::default().data(json!({ "status": text }).to_string()),
        OutboundEvent::Heartbeat => Event::default().comment("heartbeat"),
        OutboundEvent::Error(text) => Event::default().data(json!({ "error": text }).to_string()),
    }
}

async fn post_stop_generation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StopRequest>,
) -> Result<Json<Value>, ApiError> {
    let request_id =
        identifier_string(body.user_id.as_ref()).ok_or(ApiError::MissingField("user_id"))?;

    if state.registry.request_stop(&request_id) {
        tracing::info!(request_id = %request_id, "stop requested");
        Ok(Json(json!({
            "status": "success",
            "message": "Generation stopped"
        })))
    } else {
        Ok(Json(json!({
            "status": "not_found",
            "message": "No active generation found"
        })))
    }
}

async fn get_active_generations(State(state): State<Arc<AppState>>) -> Json<Value> {
    let active = state.registry.list_active();
    Json(json!({
        "active_generations": active,
        "count": active.len()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_accept_strings_and_numbers() {
        assert_eq!(
            identifier_string(Some(&json!("u1"))),
            Some("u1".to_string())
        );
        assert_eq!(identifier_string(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(identifier_string(Some(&json!(""))), None);
        assert_eq!(identifier_string(Some(&json!(null))), None);
        assert_eq!(identifier_string(None), None);
    }

    #[test]
    fn error_messages_match_the_wire_contract() {
        assert_eq!(
            ApiError::MissingField("query").to_string(),
            "Please provide query"
        );
        assert_eq!(
            ApiError::Setup("bad endpoint".to_string()).to_string(),
            "Error processing request: bad endpoint"
        );
    }
}
