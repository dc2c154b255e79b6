//! Agent response and streaming event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action the UI may offer alongside a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub label: String,
    #[serde(default)]
    pub data: Value,
}

/// Insight surfaced by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInsight {
    #[serde(rename = "type")]
    pub insight_type: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: String,
}

/// Terminal artifact of a request, produced once whether streamed or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: String,
    pub content: String,
    pub agent_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<AgentAction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<Vec<AgentInsight>>,
    /// Everything the provider attached, merged
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentResponse {
    /// Assemble a response from accumulated content and merged metadata.
    ///
    /// Recognized metadata keys: `id`, `agentType`, `suggestions`, `actions`,
    /// `insights`. A missing `id` gets a fresh UUID, a missing `agentType` the
    /// supplied fallback; malformed list fields are dropped.
    pub fn assemble(content: String, metadata: Map<String, Value>, fallback_agent_type: &str) -> Self {
        let id = metadata
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let agent_type = metadata
            .get("agentType")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| fallback_agent_type.to_string());

        Self {
            id,
            content,
            agent_type,
            timestamp: Utc::now(),
            suggestions: typed_field(&metadata, "suggestions"),
            actions: typed_field(&metadata, "actions"),
            insights: typed_field(&metadata, "insights"),
            metadata,
        }
    }
}

fn typed_field<T: serde::de::DeserializeOwned>(metadata: &Map<String, Value>, key: &str) -> Option<T> {
    let value = metadata.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(field = key, error = %e, "Ignoring malformed metadata field");
            None
        }
    }
}

/// One decoded unit of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text fragment to append
    Chunk(String),
    /// Partial metadata, shallow-merged into the accumulator
    Metadata(Map<String, Value>),
    /// Stream finished
    End,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assemble_uses_metadata_fields() {
        let metadata = json!({
            "id": "resp-1",
            "agentType": "funding",
            "suggestions": ["Model a bridge round", "Compare SAFE terms"],
            "actions": [{ "type": "navigate", "label": "Open cap table", "data": { "href": "/cap-table" } }],
            "insights": [{ "type": "risk", "title": "Runway", "description": "Under 6 months", "priority": "high" }],
            "tokens": 42
        });
        let Value::Object(metadata) = metadata else { unreachable!() };

        let response = AgentResponse::assemble("hello".to_string(), metadata, "general");
        assert_eq!(response.id, "resp-1");
        assert_eq!(response.agent_type, "funding");
        assert_eq!(response.suggestions.as_ref().unwrap().len(), 2);
        assert_eq!(response.actions.as_ref().unwrap()[0].action_type, "navigate");
        assert_eq!(response.insights.as_ref().unwrap()[0].priority, "high");
        assert_eq!(response.metadata["tokens"], 42);
    }

    #[test]
    fn test_assemble_fallbacks() {
        let mut metadata = Map::new();
        metadata.insert("suggestions".to_string(), json!("not a list"));

        let response = AgentResponse::assemble(String::new(), metadata, "general");
        assert_eq!(response.agent_type, "general");
        assert!(uuid::Uuid::parse_str(&response.id).is_ok());
        assert!(response.suggestions.is_none());
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let response = AgentResponse::assemble("x".to_string(), Map::new(), "general");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["agentType"], "general");
        assert!(value.get("suggestions").is_none());
    }
}
