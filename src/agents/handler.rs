//! Agent gateway: admission, dispatch and recording of one exchange

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;

use crate::adapters::rate_limit::{now_ms, Admission, SharedRateLimiter};
use crate::agents::config::SessionConfig;
use crate::agents::domain::{AgentRequest, AgentResponse, Role, StreamEvent};
use crate::agents::error::{classify, DomainError, GatewayResult};
use crate::agents::llm::{AgentProvider, DecodedStream, HistoryEntry, ProviderPayload};
use crate::agents::memory::ConversationStore;

/// Lifecycle of a single request through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Admitting,
    Dispatching,
    Streaming,
    Awaiting,
    Recording,
    Completed,
    Failed,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Admitting => "admitting",
            ExchangeState::Dispatching => "dispatching",
            ExchangeState::Streaming => "streaming",
            ExchangeState::Awaiting => "awaiting",
            ExchangeState::Recording => "recording",
            ExchangeState::Completed => "completed",
            ExchangeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Front door for agent conversations.
///
/// Every request is rate limited per identity, sent to the provider with the
/// session's recent history, and recorded as a user/assistant turn pair only
/// once the provider has fully answered. A failed, timed out, or abandoned
/// request leaves the session exactly as it was.
pub struct AgentGateway {
    limiter: SharedRateLimiter,
    provider: Arc<dyn AgentProvider>,
    store: Arc<dyn ConversationStore>,
    config: SessionConfig,
}

impl AgentGateway {
    pub fn new(
        limiter: SharedRateLimiter,
        provider: Arc<dyn AgentProvider>,
        store: Arc<dyn ConversationStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            limiter,
            provider,
            store,
            config,
        }
    }

    pub fn limiter(&self) -> &SharedRateLimiter {
        &self.limiter
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one exchange and return the agent's response
    pub async fn send(&self, request: AgentRequest) -> GatewayResult<AgentResponse> {
        self.send_with_observer(request, |_: &str| {}).await
    }

    /// Like [`send`](Self::send), passing each streamed chunk to `observer` as it arrives.
    ///
    /// Dropping the returned future cancels the exchange; nothing is recorded.
    pub async fn send_with_observer<F>(&self, request: AgentRequest, observer: F) -> GatewayResult<AgentResponse>
    where
        F: FnMut(&str) + Send,
    {
        let identity = request.identity.clone();
        let session_id = request.session_id.clone();

        match self.exchange(request, observer).await {
            Ok(response) => Ok(response),
            Err(err) => {
                tracing::warn!(
                    identity = %identity,
                    session_id = %session_id,
                    state = %ExchangeState::Failed,
                    code = %err.code(),
                    status = err.status(),
                    "Agent request failed: {}",
                    err.message()
                );
                Err(err)
            }
        }
    }

    async fn exchange<F>(&self, request: AgentRequest, observer: F) -> GatewayResult<AgentResponse>
    where
        F: FnMut(&str) + Send,
    {
        let issues = request.validate();
        if !issues.is_empty() {
            return Err(DomainError::validation("Invalid agent request", issues));
        }

        self.transition(&request, ExchangeState::Admitting);
        // Someone else's session is refused before it costs quota
        self.store.get(&request.session_id, &request.identity).await?;
        if let Admission::Denied { retry_after_secs } = self.limiter.admit(&request.identity, now_ms()) {
            return Err(DomainError::rate_limited(
                "Too many agent requests, please try again later",
                Some(retry_after_secs),
            ));
        }

        let session = self.store.get_or_create(&request.session_id, &request.identity).await?;
        let (mode, history) = {
            let session = session.lock().await;
            let mode = request.mode.clone().unwrap_or_else(|| session.mode().to_string());
            let history: Vec<HistoryEntry> = session
                .history(Some(self.config.history_limit))
                .iter()
                .map(HistoryEntry::from)
                .collect();
            (mode, history)
        };

        let payload = ProviderPayload {
            message: request.message.clone(),
            mode: mode.clone(),
            session_id: request.session_id.clone(),
            history,
            context: request.context.clone(),
        };

        self.transition(&request, ExchangeState::Dispatching);
        let reply = self.dispatch(&request, payload, observer);
        let response = match request.timeout_ms {
            Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), reply)
                .await
                .map_err(|_| DomainError::provider_timeout(timeout_ms))??,
            None => reply.await?,
        };

        self.transition(&request, ExchangeState::Recording);
        {
            let mut session = session.lock().await;
            let now = Utc::now();
            session.set_mode(mode.as_str());
            let user = session.turn(Role::User, request.message.as_str(), now);
            let assistant = session.turn(Role::Assistant, response.content.as_str(), now);
            session.append_turn(user);
            session.append_turn(assistant);
        }

        self.transition(&request, ExchangeState::Completed);
        Ok(response)
    }

    async fn dispatch<F>(&self, request: &AgentRequest, payload: ProviderPayload, observer: F) -> GatewayResult<AgentResponse>
    where
        F: FnMut(&str) + Send,
    {
        let fallback = self.config.default_agent_type.as_str();

        if !request.streaming {
            self.transition(request, ExchangeState::Awaiting);
            let reply = self.provider.complete(payload).await.map_err(classify)?;
            return Ok(AgentResponse::assemble(reply.content, reply.metadata, fallback));
        }

        let response = self.provider.stream_complete(payload).await.map_err(classify)?;
        let mut stream = DecodedStream::open(response, fallback).await?.with_observer(observer);

        self.transition(request, ExchangeState::Streaming);
        while let Some(event) = stream.next().await {
            if event? == StreamEvent::End {
                break;
            }
        }

        Ok(stream.into_response())
    }

    fn transition(&self, request: &AgentRequest, state: ExchangeState) {
        tracing::debug!(
            identity = %request.identity,
            session_id = %request.session_id,
            provider = %self.provider.name(),
            state = %state,
            "Agent request state"
        );
    }
}
