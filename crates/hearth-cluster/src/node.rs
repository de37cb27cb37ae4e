use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Liveness status of a cluster member.
///
/// The normal lifecycle is `New → Starting → Running`, with `Running` and
/// `Unreachable` flipping back and forth as heartbeat probes fail and
/// recover. `Stopped` marks a graceful shutdown, `Failed` an abnormal one.
/// Only the `Running ⇄ Unreachable` edges are observable through status
/// listeners; every other transition is silent bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    New,
    Starting,
    Running,
    Unreachable,
    Stopped,
    Failed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::New => "NEW",
            NodeStatus::Starting => "STARTING",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Unreachable => "UNREACHABLE",
            NodeStatus::Stopped => "STOPPED",
            NodeStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One member of the cluster.
///
/// The id is assigned at creation and immutable. Status, last-heartbeat
/// timestamp and the in-flight connection count are each independently
/// atomic: the prober, the gateway and the replication store all touch a
/// node concurrently without any outer lock.
#[derive(Debug)]
pub struct ClusterNode {
    id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    status: RwLock<NodeStatus>,
    last_heartbeat: AtomicU64,
    connections: AtomicI64,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            host: host.into(),
            port,
            status: RwLock::new(NodeStatus::Starting),
            last_heartbeat: AtomicU64::new(now_millis()),
            connections: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: NodeStatus) {
        *self.status.write() = status;
    }

    /// Timestamp (epoch millis) of the most recent probe attempt.
    pub fn last_heartbeat(&self) -> u64 {
        self.last_heartbeat.load(Ordering::Relaxed)
    }

    pub fn touch_heartbeat(&self) {
        self.last_heartbeat.store(now_millis(), Ordering::Relaxed);
    }

    /// Number of proxied exchanges currently in flight to this node.
    pub fn connection_count(&self) -> i64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn increment_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClusterNode[name={}, host={}, port={}, status={}, connections={}]",
            self.name,
            self.host,
            self.port,
            self.status(),
            self.connection_count()
        )
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
