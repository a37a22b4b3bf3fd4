//! Live sessions keyed by Twilio stream id

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use parley_pipeline::SessionController;

use crate::ServerError;

/// One session per media stream, bounded by `max_sessions`
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionController>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Add a session; rejects a second session for the same stream
    pub fn register(&self, session: Arc<SessionController>) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write();
        let id = session.stream_id();

        if sessions.contains_key(id) {
            return Err(ServerError::DuplicateStream(id.to_string()));
        }
        if sessions.len() >= self.max_sessions {
            return Err(ServerError::CapacityReached(self.max_sessions));
        }

        sessions.insert(id.to_string(), session.clone());
        tracing::info!(stream_sid = %id, active = sessions.len(), "Registered session");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionController>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Drop the entry for a finished call
    pub fn remove(&self, id: &str) -> Option<Arc<SessionController>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            tracing::info!(stream_sid = %id, "Removed session");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn has_capacity(&self) -> bool {
        self.count() < self.max_sessions
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Cancel every live session; returns how many were still running
    pub fn cancel_all(&self) -> usize {
        let sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.iter().filter(|s| s.cancel()).count()
    }
}
