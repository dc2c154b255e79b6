//! REST and streaming endpoints for the agent gateway

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::adapters::rate_limit::{now_ms, RateLimitStats};
use crate::agents::domain::{generate_session_id, AgentRequest, AgentResponse, ConversationTurn};
use crate::agents::error::{format, DomainError, GatewayResult};
use crate::agents::handler::AgentGateway;
use crate::agents::llm::DONE_SENTINEL;

/// Header carrying the caller's identity
pub const IDENTITY_HEADER: &str = "x-user-id";

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<AgentGateway>,
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ChatRequest {
    fn into_agent_request(self, identity: String, streaming: bool) -> AgentRequest {
        AgentRequest {
            identity,
            message: self.message,
            mode: self.mode,
            session_id: self.session_id.unwrap_or_else(generate_session_id),
            streaming,
            context: self.context,
            timeout_ms: self.timeout_ms,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    #[serde(flatten)]
    pub response: AgentResponse,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub mode: String,
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedSession {
    pub session_id: String,
    pub cleared: bool,
}

fn identity(headers: &HeaderMap) -> GatewayResult<String> {
    headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DomainError::authentication("Missing x-user-id header"))
}

fn parse_body(body: Result<Json<ChatRequest>, JsonRejection>) -> GatewayResult<ChatRequest> {
    body.map(|Json(request)| request)
        .map_err(|rejection| DomainError::validation(rejection.body_text(), Vec::new()))
}

// ============================================================================
// Agent Endpoints
// ============================================================================

/// POST /api/agents/chat - Single request, single response
pub async fn chat(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> GatewayResult<Json<ChatResponse>> {
    let identity = identity(&headers)?;
    let request = parse_body(body)?.into_agent_request(identity, false);
    let session_id = request.session_id.clone();

    let response = state.gateway.send(request).await?;
    Ok(Json(ChatResponse { response, session_id }))
}

/// POST /api/agents/stream - Streamed response in the agent wire format
///
/// Frames: `{"chunk": ...}` per fragment, one `{"metadata": ...}` with the
/// final response fields, then `[DONE]`. A failure after the stream has
/// started is sent as `{"error": ...}` followed by `[DONE]`.
pub async fn stream(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> GatewayResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let identity = identity(&headers)?;
    let request = parse_body(body)?.into_agent_request(identity, true);

    // Bad input is answered with a plain error response, not an error frame
    let issues = request.validate();
    if !issues.is_empty() {
        return Err(DomainError::validation("Invalid agent request", issues));
    }

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let gateway = state.gateway.clone();

    tokio::spawn(async move {
        let session_id = request.session_id.clone();
        let chunk_tx = tx.clone();
        let exchange = gateway.send_with_observer(request, move |chunk| {
            let _ = chunk_tx.send(data_event(&json!({ "chunk": chunk })));
        });

        tokio::select! {
            result = exchange => {
                let frame = match result {
                    Ok(response) => json!({ "metadata": response_metadata(response, &session_id) }),
                    Err(err) => json!({ "error": format(&err) }),
                };
                let _ = tx.send(data_event(&frame));
                let _ = tx.send(Event::default().data(DONE_SENTINEL));
            }
            _ = tx.closed() => {
                tracing::debug!(session_id = %session_id, "Client disconnected, cancelling agent stream");
            }
        }
    });

    let events = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn data_event(payload: &Value) -> Event {
    Event::default().data(payload.to_string())
}

/// Every response field except the content, flattened for the metadata frame
fn response_metadata(response: AgentResponse, session_id: &str) -> Map<String, Value> {
    let mut fields = match serde_json::to_value(&response) {
        Ok(Value::Object(fields)) => fields,
        _ => Map::new(),
    };
    fields.remove("content");

    let mut metadata = match fields.remove("metadata") {
        Some(Value::Object(nested)) => nested,
        _ => Map::new(),
    };
    metadata.extend(fields);
    metadata.insert("sessionId".to_string(), json!(session_id));
    metadata
}

// ============================================================================
// Session Endpoints
// ============================================================================

/// GET /api/agents/sessions/:id - Retained history of the caller's session
pub async fn get_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> GatewayResult<Json<SessionView>> {
    let identity = identity(&headers)?;

    let view = match state.gateway.store().get(&session_id, &identity).await? {
        Some(session) => {
            let session = session.lock().await;
            SessionView {
                session_id,
                mode: session.mode().to_string(),
                turns: session.history(None).to_vec(),
            }
        }
        // Unknown ids are simply empty; they are created on first send
        None => SessionView {
            session_id,
            mode: state.gateway.config().default_mode.clone(),
            turns: Vec::new(),
        },
    };

    Ok(Json(view))
}

/// DELETE /api/agents/sessions/:id - Clear the caller's session, keeping its mode
pub async fn clear_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> GatewayResult<Json<ClearedSession>> {
    let identity = identity(&headers)?;
    let cleared = state.gateway.store().clear(&session_id, &identity).await?;
    if cleared {
        tracing::info!(session_id = %session_id, identity = %identity, "Conversation cleared");
    }
    Ok(Json(ClearedSession { session_id, cleared }))
}

/// GET /api/agents/rate-limit - Caller's usage of the agent tier
pub async fn rate_limit_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> GatewayResult<Json<RateLimitStats>> {
    let identity = identity(&headers)?;
    Ok(Json(state.gateway.limiter().stats(&identity, now_ms())))
}
