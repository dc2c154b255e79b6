//! Incoming agent requests

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::error::FieldIssue;

/// Longest message accepted from a caller, in characters
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Longest caller-supplied session identifier
pub const MAX_SESSION_ID_CHARS: usize = 128;

/// A conversational request destined for the agent provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Rate-limit and session partition key
    pub identity: String,
    pub message: String,
    /// Requested mode; the session's current mode is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub session_id: String,
    #[serde(default)]
    pub streaming: bool,
    /// Opaque caller context forwarded to the provider
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Deadline for the provider exchange, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl AgentRequest {
    /// Create a non-streaming request in a fresh session
    pub fn new(identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            message: message.into(),
            mode: None,
            session_id: generate_session_id(),
            streaming: false,
            context: Map::new(),
            timeout_ms: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Field-level problems with this request; empty when valid
    pub fn validate(&self) -> Vec<FieldIssue> {
        let mut issues = Vec::new();

        if self.identity.trim().is_empty() {
            issues.push(FieldIssue::new("identity", "Identity is required", "required"));
        }

        if self.message.trim().is_empty() {
            issues.push(FieldIssue::new("message", "Message is required", "required"));
        } else if self.message.chars().count() > MAX_MESSAGE_CHARS {
            issues.push(FieldIssue::new(
                "message",
                format!("Message must be at most {} characters", MAX_MESSAGE_CHARS),
                "too_long",
            ));
        }

        if self.session_id.trim().is_empty() {
            issues.push(FieldIssue::new("sessionId", "Session id is required", "required"));
        } else if self.session_id.chars().count() > MAX_SESSION_ID_CHARS {
            issues.push(FieldIssue::new(
                "sessionId",
                format!("Session id must be at most {} characters", MAX_SESSION_ID_CHARS),
                "too_long",
            ));
        }

        if let Some(mode) = &self.mode {
            if mode.trim().is_empty() {
                issues.push(FieldIssue::new("mode", "Mode must not be blank", "invalid"));
            }
        }

        issues
    }
}

/// Generate `session-<epoch-ms>-<random suffix>`
pub fn generate_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("session-{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}
