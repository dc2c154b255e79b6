//! In-memory conversation store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{ConversationStore, SharedSession};
use crate::agents::domain::{ConversationSession, DEFAULT_MODE};
use crate::agents::error::{DomainError, GatewayResult};

/// Default cap on live sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// In-memory conversation store
///
/// Holds at most `max_sessions` sessions. Creating one past the cap evicts the
/// least recently updated session that no exchange is currently holding.
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
    max_turns_per_session: usize,
    max_sessions: usize,
    default_mode: String,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new(max_turns_per_session: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_turns_per_session,
            max_sessions: DEFAULT_MAX_SESSIONS,
            default_mode: DEFAULT_MODE.to_string(),
        }
    }

    /// Mode that new sessions start in
    pub fn with_default_mode(mut self, mode: impl Into<String>) -> Self {
        self.default_mode = mode.into();
        self
    }

    /// Cap the number of live sessions (at least one)
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Make room for one more session.
    ///
    /// Sessions with outstanding handles are in use and never evicted; when
    /// every session is busy the cap is exceeded until one frees up.
    fn evict_least_recent(&self, sessions: &mut HashMap<String, SharedSession>) {
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, session)| Arc::strong_count(session) == 1)
                .filter_map(|(id, session)| session.try_lock().ok().map(|s| (s.updated_at, id.clone())))
                .min();

            match oldest {
                Some((updated_at, id)) => {
                    sessions.remove(&id);
                    tracing::debug!(session_id = %id, %updated_at, "Evicted least recently updated session");
                }
                None => {
                    tracing::warn!(
                        live = sessions.len(),
                        max_sessions = self.max_sessions,
                        "Session cap exceeded; every session is in use"
                    );
                    break;
                }
            }
        }
    }

    async fn owned(&self, session_id: &str, identity: &str) -> GatewayResult<Option<SharedSession>> {
        let session = match self.sessions.read().await.get(session_id) {
            Some(session) => session.clone(),
            None => return Ok(None),
        };

        check_owner(&session, session_id, identity).await?;
        Ok(Some(session))
    }
}

async fn check_owner(session: &SharedSession, session_id: &str, identity: &str) -> GatewayResult<()> {
    let owner = session.lock().await.identity.clone();
    if owner != identity {
        tracing::warn!(session_id = %session_id, identity = %identity, "Session accessed by a different identity");
        return Err(DomainError::authorization("Session belongs to another user"));
    }
    Ok(())
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_or_create(&self, session_id: &str, identity: &str) -> GatewayResult<SharedSession> {
        if let Some(session) = self.owned(session_id, identity).await? {
            return Ok(session);
        }

        let mut sessions = self.sessions.write().await;
        // Another task may have created it between the read and write locks
        let session = match sessions.get(session_id) {
            Some(session) => session.clone(),
            None => {
                self.evict_least_recent(&mut sessions);
                tracing::debug!(session_id = %session_id, identity = %identity, "Creating conversation session");
                let mut session =
                    ConversationSession::new(session_id, identity).with_max_retained(self.max_turns_per_session);
                session.set_mode(self.default_mode.as_str());
                let session = Arc::new(Mutex::new(session));
                sessions.insert(session_id.to_string(), session.clone());
                session
            }
        };
        drop(sessions);

        check_owner(&session, session_id, identity).await?;
        Ok(session)
    }

    async fn get(&self, session_id: &str, identity: &str) -> GatewayResult<Option<SharedSession>> {
        self.owned(session_id, identity).await
    }

    async fn clear(&self, session_id: &str, identity: &str) -> GatewayResult<bool> {
        match self.owned(session_id, identity).await? {
            Some(session) => {
                session.lock().await.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, session_id: &str, identity: &str) -> GatewayResult<bool> {
        if self.owned(session_id, identity).await?.is_none() {
            return Ok(false);
        }
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
