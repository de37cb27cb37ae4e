use crate::node::{ClusterNode, NodeStatus};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide directory of known cluster nodes, keyed by node id.
///
/// One registry is constructed at startup and shared via `Arc` by every
/// subsystem; reads and writes go through the concurrent map, so there is
/// no global lock serializing the prober, the gateway and the replication
/// store.
///
/// Registration is advisory: an invalid node descriptor is dropped with a
/// diagnostic, never surfaced as an error to the caller.
pub struct ClusterRegistry {
    nodes: DashMap<String, Arc<ClusterNode>>,
    current: RwLock<Option<Arc<ClusterNode>>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            current: RwLock::new(None),
        }
    }

    /// Registers a node after validating its descriptor. Rejected
    /// registrations are logged and dropped.
    pub fn register(&self, node: Arc<ClusterNode>) {
        if !self.validate(&node) {
            return;
        }
        info!("node registered: {}", node);
        self.nodes.insert(node.id().to_string(), node);
    }

    pub fn unregister(&self, node_id: &str) {
        if let Some((_, node)) = self.nodes.remove(node_id) {
            info!("node unregistered: {}", node);
        }
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<ClusterNode>> {
        self.nodes.get(node_id).map(|e| e.value().clone())
    }

    /// Snapshot of every registered node. Callers iterate the copy, so
    /// concurrent registration or removal never invalidates it.
    pub fn list_all(&self) -> Vec<Arc<ClusterNode>> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    /// Nodes currently in `Running` status, i.e. eligible routing targets.
    pub fn list_healthy(&self) -> Vec<Arc<ClusterNode>> {
        self.nodes
            .iter()
            .filter(|e| e.value().status() == NodeStatus::Running)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Marks which registry entry represents the local process. Used to
    /// exclude self from replication fan-out.
    pub fn set_current_node(&self, node: Arc<ClusterNode>) {
        *self.current.write() = Some(node);
    }

    pub fn current_node(&self) -> Option<Arc<ClusterNode>> {
        self.current.read().clone()
    }

    /// Whether `node` denotes the local process, compared by host and port
    /// rather than id so that a re-registered entry still matches.
    pub fn is_current(&self, node: &ClusterNode) -> bool {
        match self.current.read().as_ref() {
            Some(current) => current.host == node.host && current.port == node.port,
            None => false,
        }
    }

    /// Direct status write without listener notification. Managed
    /// transitions (the ones that fire listeners) go through
    /// [`crate::detector::NodeStatusManager::update_status`] instead.
    pub fn update_status(&self, node: &ClusterNode, status: NodeStatus) {
        node.set_status(status);
        info!("node status updated: {} -> {}", node, status);
    }

    fn validate(&self, node: &ClusterNode) -> bool {
        if node.name.trim().is_empty() {
            warn!("rejecting node registration: empty name");
            return false;
        }
        if node.host.trim().is_empty() {
            warn!("rejecting node registration: empty host");
            return false;
        }
        if node.port == 0 {
            warn!("rejecting node registration: invalid port");
            return false;
        }
        true
    }
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
