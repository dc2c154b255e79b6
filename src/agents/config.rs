//! Configuration types for the agent gateway

use serde::{Deserialize, Serialize};

use super::domain::{DEFAULT_MAX_RETAINED_TURNS, DEFAULT_MODE};
use super::memory::DEFAULT_MAX_SESSIONS;

/// Upstream agent service configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProviderConfig {
    /// Base URL of the agent service
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable containing the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Connect timeout, and total timeout for non-streamed replies
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:4000".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: None,
            timeout_seconds: default_timeout(),
        }
    }
}

/// Conversation handling configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SessionConfig {
    /// Number of most recent turns sent to the provider
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Turns kept per session before the oldest are evicted
    #[serde(default = "default_max_retained_turns")]
    pub max_retained_turns: usize,
    /// Live sessions kept before the least recently updated is evicted
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Mode used when neither the request nor the session names one
    #[serde(default = "default_mode")]
    pub default_mode: String,
    /// Agent type reported when the provider does not name one
    #[serde(default = "default_agent_type")]
    pub default_agent_type: String,
}

fn default_history_limit() -> usize {
    10
}

fn default_max_retained_turns() -> usize {
    DEFAULT_MAX_RETAINED_TURNS
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

fn default_agent_type() -> String {
    DEFAULT_MODE.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_retained_turns: default_max_retained_turns(),
            max_sessions: default_max_sessions(),
            default_mode: default_mode(),
            default_agent_type: default_agent_type(),
        }
    }
}
