//! Conversation session storage
//!
//! Sessions live in memory, bounded by a cap on live sessions. Each session
//! sits behind its own mutex so different sessions never contend with each other.

mod in_memory;

pub use in_memory::{InMemoryStore, DEFAULT_MAX_SESSIONS};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agents::domain::ConversationSession;
use crate::agents::error::GatewayResult;

/// Handle to one session; lock it only for short, non-suspending sections
pub type SharedSession = Arc<Mutex<ConversationSession>>;

/// Trait for conversation storage backends
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch the session, creating it for `identity` on first use.
    ///
    /// Fails with an authorization error when the session belongs to another identity.
    async fn get_or_create(&self, session_id: &str, identity: &str) -> GatewayResult<SharedSession>;

    /// Fetch an existing session owned by `identity`
    async fn get(&self, session_id: &str, identity: &str) -> GatewayResult<Option<SharedSession>>;

    /// Discard the turns of a session; returns whether it existed
    async fn clear(&self, session_id: &str, identity: &str) -> GatewayResult<bool>;

    /// Drop a session entirely; returns whether it existed
    async fn remove(&self, session_id: &str, identity: &str) -> GatewayResult<bool>;

    /// Number of live sessions
    async fn len(&self) -> usize;
}
