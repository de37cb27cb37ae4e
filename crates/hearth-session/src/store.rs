use crate::session::Session;
use crate::wire::{self, ReplicationAction};
use dashmap::DashMap;
use hearth_cluster::{ClusterNode, ClusterRegistry};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Path peers accept replication traffic on.
pub const REPLICATION_PATH: &str = "/_sessionReplication";

/// Connect-and-read budget for one peer replication call.
const REPLICATION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Session store that mirrors writes and deletes to every peer node.
///
/// The local map is the source of truth for requests served by this
/// process. Replication is fire and forget: each peer gets its own spawned
/// task with a 1000ms deadline, failures are logged and never surface to
/// the caller. Last writer wins; there is no version reconciliation.
pub struct ReplicatedSessionStore {
    sessions: DashMap<String, Session>,
    registry: Arc<ClusterRegistry>,
}

impl ReplicatedSessionStore {
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self {
            sessions: DashMap::new(),
            registry,
        }
    }

    /// Writes locally, then broadcasts the save to all peers.
    pub fn save(&self, session: &Session) {
        self.save_local(session.clone());
        self.broadcast(wire::save_body(session));
    }

    /// Reads a session. An expired or invalidated entry is reaped and
    /// reported as absent; peers are never consulted.
    pub fn load(&self, session_id: &str) -> Option<Session> {
        let session = self.sessions.get(session_id).map(|e| e.value().clone())?;
        if !session.is_valid() {
            debug!("session {} expired, removing", session_id);
            self.delete_local(session_id);
            return None;
        }
        Some(session)
    }

    /// Removes locally, then broadcasts the delete to all peers.
    pub fn delete(&self, session_id: &str) {
        self.delete_local(session_id);
        self.broadcast(wire::delete_body(session_id));
    }

    /// Local write without re-broadcast, used when applying replication
    /// traffic from a peer.
    pub fn save_local(&self, session: Session) {
        self.sessions.insert(session.id().to_string(), session);
    }

    /// Local remove without re-broadcast.
    pub fn delete_local(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Applies a decoded replication request. Never re-broadcasts, so a
    /// save cannot ping-pong between peers.
    pub fn apply(&self, action: ReplicationAction) {
        match action {
            ReplicationAction::Save(session) => {
                debug!("replicated save of session {}", session.id());
                self.save_local(session);
            }
            ReplicationAction::Delete(id) => {
                debug!("replicated delete of session {}", id);
                self.delete_local(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Spawns one bounded POST per registered node other than the current
    /// one. Must be called from within a tokio runtime.
    fn broadcast(&self, body: String) {
        for node in self.registry.list_all() {
            if self.registry.is_current(&node) {
                continue;
            }
            let body = body.clone();
            tokio::spawn(async move {
                if let Err(e) = replicate_to(&node, body).await {
                    warn!(
                        "replication to {}:{} failed: {}",
                        node.host, node.port, e
                    );
                }
            });
        }
    }
}

async fn replicate_to(node: &Arc<ClusterNode>, body: String) -> hearth_cluster::Result<()> {
    use hearth_cluster::HearthError;

    let url = format!("http://{}:{}{}", node.host, node.port, REPLICATION_PATH);
    let request = hyper::Request::builder()
        .method("POST")
        .uri(&url)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| HearthError::Replication(format!("failed to build request: {}", e)))?;

    let client = Client::builder(TokioExecutor::new()).build_http();
    let response = tokio::time::timeout(REPLICATION_TIMEOUT, client.request(request))
        .await
        .map_err(|_| HearthError::Timeout(REPLICATION_TIMEOUT.as_millis() as u64))?
        .map_err(|e| HearthError::Replication(e.to_string()))?;

    if response.status() != hyper::StatusCode::OK {
        return Err(HearthError::Replication(format!(
            "peer {} answered {}",
            url,
            response.status()
        )));
    }
    debug!("replicated to {}", url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn store() -> ReplicatedSessionStore {
        ReplicatedSessionStore::new(Arc::new(ClusterRegistry::new()))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = store();
        let mut session = Session::new("s1");
        session.set_attribute("user", Value::String("alice".into()));
        store.save(&session);

        let loaded = store.load("s1").unwrap();
        assert_eq!(loaded.id(), "s1");
        assert_eq!(
            loaded.get_attribute("user"),
            Some(&Value::String("alice".into()))
        );
        assert!(store.load("missing").is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        store.save(&Session::new("s1"));
        store.delete("s1");
        assert!(store.load("s1").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_is_reaped_on_load() {
        let store = store();
        let expired = Session::from_wire(
            "old".into(),
            0,
            0, // last accessed at the epoch
            60,
            Default::default(),
        );
        store.save_local(expired);
        assert_eq!(store.len(), 1);
        assert!(store.load("old").is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_apply_does_not_broadcast() {
        // registry with a peer that would be hit if apply broadcast
        let registry = Arc::new(ClusterRegistry::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        registry.register(Arc::new(ClusterNode::new("peer", "127.0.0.1", port)));

        let store = ReplicatedSessionStore::new(registry);
        store.apply(ReplicationAction::Save(Session::new("s1")));
        assert!(store.load("s1").is_some());
        store.apply(ReplicationAction::Delete("s1".into()));
        assert!(store.load("s1").is_none());
    }
}
