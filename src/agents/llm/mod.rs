//! Agent provider capability
//!
//! The provider is the upstream language-model agent. It accepts a payload
//! and answers either with one complete reply or with a byte stream in the
//! agent streaming wire format (see [`stream`]).

mod http;
mod stream;

pub use http::HttpAgentProvider;
pub use stream::*;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;

use crate::agents::domain::{ConversationTurn, Role};
use crate::agents::error::RawError;

/// Raw bytes of a streamed provider response
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, crate::agents::error::ProviderError>> + Send>>;

/// Trait for agent providers
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Provider name, for logs
    fn name(&self) -> &str;

    /// Single request, single reply
    async fn complete(&self, payload: ProviderPayload) -> Result<ProviderReply, RawError>;

    /// Streamed reply; the status is checked by the caller before decoding
    async fn stream_complete(&self, payload: ProviderPayload) -> Result<StreamResponse, RawError>;
}

/// One prior turn as the provider sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&ConversationTurn> for HistoryEntry {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// Request body sent to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPayload {
    pub message: String,
    pub mode: String,
    pub session_id: String,
    /// Most recent turns, oldest first
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Non-streamed provider reply
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderReply {
    pub content: String,
    /// Response fields other than the content (`id`, `agentType`, `suggestions`, ...)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ProviderReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Streamed provider reply, before its status has been checked
pub struct StreamResponse {
    pub status: u16,
    pub body: ByteStream,
    /// `Retry-After` hint sent with the response, in seconds
    pub retry_after_secs: Option<u64>,
}

impl StreamResponse {
    pub fn ok(body: ByteStream) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: ByteStream) -> Self {
        Self {
            status,
            body,
            retry_after_secs: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_secs: Option<u64>) -> Self {
        self.retry_after_secs = retry_after_secs;
        self
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse").field("status", &self.status).finish_non_exhaustive()
    }
}
