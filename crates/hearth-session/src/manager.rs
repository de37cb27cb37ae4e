use crate::session::Session;
use crate::store::ReplicatedSessionStore;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Session lifecycle facade over the replicated store.
pub struct SessionManager {
    store: Arc<ReplicatedSessionStore>,
}

impl SessionManager {
    pub fn new(store: Arc<ReplicatedSessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ReplicatedSessionStore> {
        &self.store
    }

    /// Creates and persists a fresh session with a dash-free uuid id.
    pub fn create_session(&self) -> Session {
        let id = Uuid::new_v4().simple().to_string();
        let session = Session::new(id);
        debug!("created session {}", session.id());
        self.store.save(&session);
        session
    }

    /// Loads a session by id, touching its last-accessed time and
    /// persisting the touch. Absent or expired sessions yield `None`.
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let mut session = self.store.load(session_id)?;
        session.access();
        self.store.save(&session);
        Some(session)
    }

    pub fn remove_session(&self, session_id: &str) {
        debug!("removing session {}", session_id);
        self.store.delete(session_id);
    }
}
