use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use tandem_core::state::{SessionState, StateMap};
use tandem_core::types::SessionId;

/// One conversation's worth of shared state.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

/// Tracks live sessions. A session's state lives until [`SessionManager::end`].
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a session with empty state.
    pub fn start(&self) -> Session {
        self.start_with(StateMap::new())
    }

    /// Start a session seeded with `state`.
    pub fn start_with(&self, state: StateMap) -> Session {
        let session = Session {
            id: SessionId::new(),
            state: SessionState::from_map(state),
            started_at: Utc::now(),
        };
        debug!(session_id = %session.id, "Session started");
        self.lock().insert(session.id.0.clone(), session.clone());
        session
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.lock().get(&id.0).cloned()
    }

    /// Tear down a session, returning it if it was live.
    pub fn end(&self, id: &SessionId) -> Option<Session> {
        let ended = self.lock().remove(&id.0);
        if ended.is_some() {
            debug!(session_id = %id, "Session ended");
        }
        ended
    }

    /// Ids of live sessions.
    pub fn list(&self) -> Vec<SessionId> {
        self.lock().values().map(|s| s.id.clone()).collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
