use crate::request::RequestWrapper;
use hearth_cluster::ClusterNode;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Picks one node out of the healthy set for a request. `None` only when
/// the set is empty.
pub trait LoadBalancer: Send + Sync {
    fn select_node(
        &self,
        request: &RequestWrapper,
        nodes: &[Arc<ClusterNode>],
    ) -> Option<Arc<ClusterNode>>;
}

/// Cycles through the node list with a shared counter. The list is
/// recomputed per request, so the rotation converges to uniform only over
/// a stable membership.
pub struct RoundRobinBalancer {
    counter: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select_node(
        &self,
        _request: &RequestWrapper,
        nodes: &[Arc<ClusterNode>],
    ) -> Option<Arc<ClusterNode>> {
        if nodes.is_empty() {
            return None;
        }
        // pre-increment, so the first pick lands on index 1
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let index = (count % nodes.len() as u64) as usize;
        Some(nodes[index].clone())
    }
}

/// Picks the node with the fewest in-flight proxied connections, first
/// encountered winning ties.
pub struct LeastConnectionsBalancer;

impl LoadBalancer for LeastConnectionsBalancer {
    fn select_node(
        &self,
        _request: &RequestWrapper,
        nodes: &[Arc<ClusterNode>],
    ) -> Option<Arc<ClusterNode>> {
        nodes.iter().min_by_key(|n| n.connection_count()).cloned()
    }
}

/// Routes a given session id to a stable index as long as the node list
/// keeps its size and order. Requests without a session fall back to a
/// time-seeded pick. Membership changes break stickiness.
pub struct StickyHashBalancer;

impl LoadBalancer for StickyHashBalancer {
    fn select_node(
        &self,
        request: &RequestWrapper,
        nodes: &[Arc<ClusterNode>],
    ) -> Option<Arc<ClusterNode>> {
        if nodes.is_empty() {
            return None;
        }
        let index = match &request.session_id {
            Some(session_id) => {
                let mut hasher = DefaultHasher::new();
                session_id.hash(&mut hasher);
                (hasher.finish() % nodes.len() as u64) as usize
            }
            None => {
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos() as u64;
                (nanos % nodes.len() as u64) as usize
            }
        };
        Some(nodes[index].clone())
    }
}

/// Looks up a balancer by its CLI name.
pub fn balancer_for(name: &str) -> Option<Arc<dyn LoadBalancer>> {
    match name {
        "round-robin" => Some(Arc::new(RoundRobinBalancer::new())),
        "least-conn" => Some(Arc::new(LeastConnectionsBalancer)),
        "sticky" => Some(Arc::new(StickyHashBalancer)),
        _ => None,
    }
}
