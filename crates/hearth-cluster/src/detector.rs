use crate::node::{ClusterNode, NodeStatus};
use crate::registry::ClusterRegistry;
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Observer of node availability transitions.
///
/// Only the `Running → Unreachable` and `Unreachable → Running` edges are
/// delivered; all other status changes are silent.
pub trait StatusListener: Send + Sync {
    fn on_node_down(&self, node: &ClusterNode);
    fn on_node_up(&self, node: &ClusterNode);
}

/// Listener that logs availability transitions, the default wiring for a
/// freshly started member.
pub struct LoggingStatusListener;

impl StatusListener for LoggingStatusListener {
    fn on_node_down(&self, node: &ClusterNode) {
        warn!("cluster node {} ({}:{}) is DOWN", node.name, node.host, node.port);
    }

    fn on_node_up(&self, node: &ClusterNode) {
        info!("cluster node {} ({}:{}) is UP", node.name, node.host, node.port);
    }
}

/// Applies status reports from the heartbeat prober and fires listeners on
/// availability transitions.
///
/// This is the managed update path: probe outcomes come through
/// [`NodeStatusManager::update_status`] so that the `Running ⇄ Unreachable`
/// edges invoke the failure/recovery hooks and notify every listener.
/// Direct lifecycle writes bypass it via
/// [`ClusterRegistry::update_status`], which notifies nobody.
pub struct NodeStatusManager {
    registry: Arc<ClusterRegistry>,
    listeners: DashMap<String, Arc<dyn StatusListener>>,
}

impl NodeStatusManager {
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self {
            registry,
            listeners: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    pub fn add_listener(&self, id: impl Into<String>, listener: Arc<dyn StatusListener>) {
        self.listeners.insert(id.into(), listener);
    }

    pub fn remove_listener(&self, id: &str) {
        self.listeners.remove(id);
    }

    /// Applies a `(node, new_status)` report. Unchanged status is a no-op;
    /// the status is written before any hook or listener runs.
    pub fn update_status(&self, node: &Arc<ClusterNode>, new_status: NodeStatus) {
        let old_status = node.status();
        if old_status == new_status {
            return;
        }
        info!(
            "node {} status changing from {} to {}",
            node.id(),
            old_status,
            new_status
        );
        node.set_status(new_status);

        match (old_status, new_status) {
            (NodeStatus::Running, NodeStatus::Unreachable) => {
                self.cleanup_node_resources(node);
                self.notify(node, new_status);
            }
            (NodeStatus::Unreachable, NodeStatus::Running) => {
                self.reallocate_node_resources(node);
                self.notify(node, new_status);
            }
            _ => {
                debug!("silent transition for node {}", node.id());
            }
        }
    }

    /// Notifies a snapshot of the listener map. A failing listener never
    /// aborts delivery to the rest.
    fn notify(&self, node: &Arc<ClusterNode>, status: NodeStatus) {
        let snapshot: Vec<(String, Arc<dyn StatusListener>)> = self
            .listeners
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (id, listener) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if status == NodeStatus::Unreachable {
                    listener.on_node_down(node);
                } else {
                    listener.on_node_up(node);
                }
            }));
            if outcome.is_err() {
                error!("status listener {} failed for node {}", id, node.id());
            }
        }
    }

    fn cleanup_node_resources(&self, node: &Arc<ClusterNode>) {
        // Nothing pooled to tear down yet; forwarding and replication open
        // per-request connections.
        warn!("node {} is down, cleaning up resources", node.id());
    }

    fn reallocate_node_resources(&self, node: &Arc<ClusterNode>) {
        info!("node {} recovered, reallocating resources", node.id());
    }
}
