//! Conversation turns and sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default mode for sessions that never switched
pub const DEFAULT_MODE: &str = "general";

/// Default number of turns retained per session for display
pub const DEFAULT_MAX_RETAINED_TURNS: usize = 100;

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Mode the session was in when the turn was recorded
    pub mode: String,
}

/// Ordered history of turns for one logical session
///
/// Append-only: turns are never reordered or deduplicated. The only eviction
/// is the retention cap, which drops the oldest turns first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    /// Identity that created the session
    pub identity: String,
    mode: String,
    turns: Vec<ConversationTurn>,
    max_retained: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Create an empty session in the default mode
    pub fn new(session_id: impl Into<String>, identity: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            identity: identity.into(),
            mode: DEFAULT_MODE.to_string(),
            turns: Vec::new(),
            max_retained: DEFAULT_MAX_RETAINED_TURNS,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cap the number of retained turns (at least one turn is always kept)
    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained.max(1);
        self
    }

    /// Current mode
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Switch mode; only turns built afterwards carry the new mode
    pub fn set_mode(&mut self, mode: impl Into<String>) {
        self.mode = mode.into();
        self.updated_at = Utc::now();
    }

    /// Back to [`DEFAULT_MODE`]
    pub fn reset_mode(&mut self) {
        self.set_mode(DEFAULT_MODE);
    }

    /// Build a turn tagged with the current mode
    pub fn turn(&self, role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> ConversationTurn {
        ConversationTurn {
            role,
            content: content.into(),
            timestamp,
            mode: self.mode.clone(),
        }
    }

    /// Append a turn, evicting the oldest turns past the retention cap.
    ///
    /// A reply whose prompt was evicted goes with it, so history never opens
    /// on an assistant turn.
    pub fn append_turn(&mut self, turn: ConversationTurn) {
        self.updated_at = turn.timestamp.max(self.updated_at);
        self.turns.push(turn);

        if self.turns.len() > self.max_retained {
            let mut excess = self.turns.len() - self.max_retained;
            while self.turns.get(excess).is_some_and(|t| t.role == Role::Assistant) {
                excess += 1;
            }
            self.turns.drain(0..excess);
        }
    }

    /// The last `limit` turns (all when `None`), most recent last
    pub fn history(&self, limit: Option<usize>) -> &[ConversationTurn] {
        match limit {
            Some(limit) if limit < self.turns.len() => &self.turns[self.turns.len() - limit..],
            _ => &self.turns,
        }
    }

    /// Discard all turns, keeping the mode
    pub fn clear(&mut self) {
        self.turns.clear();
        self.updated_at = Utc::now();
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
