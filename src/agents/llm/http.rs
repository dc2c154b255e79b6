//! HTTP agent provider talking to an upstream agent service

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::env;
use std::time::Duration;

use super::stream::{read_limited, MAX_ERROR_BODY_BYTES};
use super::{AgentProvider, ByteStream, ProviderPayload, ProviderReply, StreamResponse};
use crate::agents::config::ProviderConfig;
use crate::agents::error::{parse_retry_after, ProviderError, RawError};

/// Provider backed by an agent service exposing `/api/agents/chat` and `/api/agents/stream`
pub struct HttpAgentProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpAgentProvider {
    /// Create a provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = match &config.api_key_env {
            Some(env_var) => Some(env::var(env_var).map_err(|_| ProviderError::Authentication {
                message: format!("Environment variable {} not set", env_var),
            })?),
            None => None,
        };

        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Some(timeout),
        })
    }

    /// Provider without credentials, mostly for local agent services
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: None,
        }
    }

    fn post(&self, path: &str, payload: &ProviderPayload) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(payload);

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        request
    }

    /// `Retry-After` of an upstream response, in seconds
    fn retry_after(response: &reqwest::Response) -> Option<u64> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_retry_after(value, chrono::Utc::now()))
    }

    fn body_stream(response: reqwest::Response) -> ByteStream {
        Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(ProviderError::from)))
    }

    /// Split a JSON reply into content and metadata
    fn parse_reply(body: Value) -> Result<ProviderReply, ProviderError> {
        let Value::Object(mut obj) = body else {
            return Err(ProviderError::MalformedBody("expected a JSON object".to_string()));
        };

        let content = match obj.remove("content") {
            Some(Value::String(content)) => content,
            _ => return Err(ProviderError::MalformedBody("missing string field `content`".to_string())),
        };

        let mut metadata = match obj.remove("metadata") {
            Some(Value::Object(nested)) => nested,
            _ => Map::new(),
        };
        // Top-level response fields win over nested metadata
        metadata.extend(obj);

        Ok(ProviderReply { content, metadata })
    }
}

#[async_trait]
impl AgentProvider for HttpAgentProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, payload: ProviderPayload) -> Result<ProviderReply, RawError> {
        let mut request = self.post("/api/agents/chat", &payload);
        // Only the single reply is bounded; streams run until the gateway deadline
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(ProviderError::from)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = Self::retry_after(&response);
            let body = read_limited(Self::body_stream(response), MAX_ERROR_BODY_BYTES).await;
            let err = ProviderError::from_status(status.as_u16(), &body).with_retry_after(retry_after);
            tracing::warn!(status = status.as_u16(), error = %err, "Agent call rejected upstream");
            return Err(err.into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedBody(e.to_string()))?;

        Ok(Self::parse_reply(body)?)
    }

    async fn stream_complete(&self, payload: ProviderPayload) -> Result<StreamResponse, RawError> {
        let response = self
            .post("/api/agents/stream", &payload)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(ProviderError::from)?;

        let status = response.status().as_u16();
        let retry_after = Self::retry_after(&response);

        Ok(StreamResponse::with_status(status, Self::body_stream(response)).with_retry_after(retry_after))
    }
}
