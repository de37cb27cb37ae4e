use crate::detector::NodeStatusManager;
use crate::error::{HearthError, Result};
use crate::node::{ClusterNode, NodeStatus};
use crate::registry::ClusterRegistry;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::StatusCode;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bounded wait for the probe task to drain on shutdown before it is
/// force-cancelled.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Periodic liveness prober.
///
/// Every `interval` it snapshots the registry and issues
/// `GET http://host:port/ping` against each node with a per-node deadline
/// of `timeout`. Probes run concurrently, so a hung node costs only its
/// own timeout budget. A 200 response is reported as `Running`, anything
/// else as `Unreachable`; reports go through the status manager so that
/// availability listeners fire.
pub struct HeartbeatProber {
    registry: Arc<ClusterRegistry>,
    status_manager: Arc<NodeStatusManager>,
    interval: Duration,
    timeout: Duration,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl HeartbeatProber {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        status_manager: Arc<NodeStatusManager>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            status_manager,
            interval,
            timeout,
            task: Mutex::new(None),
        }
    }

    /// Starts the probe loop. Calling `start` on a running prober is a
    /// no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = self.registry.clone();
        let status_manager = self.status_manager.clone();
        let interval = self.interval;
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // skip the immediate first tick so the first probe lands one
            // interval after start, matching the schedule of the original
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        probe_all(&registry, &status_manager, timeout).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("heartbeat prober shutting down");
                        break;
                    }
                }
            }
        });

        *task = Some((shutdown_tx, handle));
        info!("heartbeat prober started with interval {:?}", self.interval);
    }

    /// Stops the probe loop, waiting up to five seconds before aborting
    /// the task. Calling `stop` on a stopped prober is a no-op.
    pub async fn stop(&self) {
        let taken = self.task.lock().take();
        if let Some((shutdown_tx, handle)) = taken {
            let _ = shutdown_tx.send(true);
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!("heartbeat prober did not stop in time, cancelling");
                abort.abort();
            }
            info!("heartbeat prober stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

/// One probe sweep over the full registry. Each node's outcome is
/// independent and reported through the status manager.
async fn probe_all(
    registry: &Arc<ClusterRegistry>,
    status_manager: &Arc<NodeStatusManager>,
    timeout: Duration,
) {
    let nodes = registry.list_all();
    let probes = nodes.into_iter().map(|node| async move {
        let outcome = probe_node(&node, timeout).await;
        (node, outcome)
    });
    let results = futures::future::join_all(probes).await;

    for (node, outcome) in results {
        node.touch_heartbeat();
        let status = match outcome {
            Ok(()) => NodeStatus::Running,
            Err(e) => {
                debug!("probe of node {} failed: {}", node.name, e);
                NodeStatus::Unreachable
            }
        };
        status_manager.update_status(&node, status);
    }
}

/// Probes a single node with both connect and read bounded by `timeout`.
async fn probe_node(node: &Arc<ClusterNode>, timeout: Duration) -> Result<()> {
    let url = format!("http://{}:{}/ping", node.host, node.port);
    let request = hyper::Request::builder()
        .method("GET")
        .uri(&url)
        .body(Full::new(Bytes::new()))
        .map_err(|e| HearthError::Probe(format!("failed to build request: {}", e)))?;

    let client = Client::builder(TokioExecutor::new()).build_http();
    let response = tokio::time::timeout(timeout, client.request(request))
        .await
        .map_err(|_| HearthError::Timeout(timeout.as_millis() as u64))?
        .map_err(|e| HearthError::Probe(e.to_string()))?;

    if response.status() != StatusCode::OK {
        return Err(HearthError::Probe(format!(
            "unexpected status {} from {}",
            response.status(),
            url
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::StatusListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        downs: AtomicUsize,
        ups: AtomicUsize,
    }

    impl StatusListener for CountingListener {
        fn on_node_down(&self, _node: &ClusterNode) {
            self.downs.fetch_add(1, Ordering::SeqCst);
        }
        fn on_node_up(&self, _node: &ClusterNode) {
            self.ups.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn spawn_ping_backend() -> (std::net::SocketAddr, JoinHandle<()>) {
        let app = axum::Router::new().route("/ping", axum::routing::get(|| async { "OK" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_probe_marks_live_node_running() {
        let (addr, backend) = spawn_ping_backend().await;

        let registry = Arc::new(ClusterRegistry::new());
        let node = Arc::new(ClusterNode::new("n1", "127.0.0.1", addr.port()));
        registry.register(node.clone());
        let status_manager = Arc::new(NodeStatusManager::new(registry.clone()));

        let prober = HeartbeatProber::new(
            registry,
            status_manager,
            Duration::from_millis(50),
            Duration::from_millis(500),
        );
        prober.start();
        // start is idempotent
        prober.start();
        assert!(prober.is_running());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(node.status(), NodeStatus::Running);

        prober.stop().await;
        assert!(!prober.is_running());
        prober.stop().await; // idempotent
        backend.abort();
    }

    #[tokio::test]
    async fn test_probe_failure_transitions_to_unreachable() {
        // bind then drop to get a port that refuses connections
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);

        let registry = Arc::new(ClusterRegistry::new());
        let node = Arc::new(ClusterNode::new("n1", "127.0.0.1", dead_port));
        node.set_status(NodeStatus::Running);
        registry.register(node.clone());
        let status_manager = Arc::new(NodeStatusManager::new(registry.clone()));
        let listener = Arc::new(CountingListener {
            downs: AtomicUsize::new(0),
            ups: AtomicUsize::new(0),
        });
        status_manager.add_listener("counting", listener.clone());

        let prober = HeartbeatProber::new(
            registry,
            status_manager,
            Duration::from_millis(50),
            Duration::from_millis(300),
        );
        prober.start();
        tokio::time::sleep(Duration::from_millis(400)).await;
        prober.stop().await;

        assert_eq!(node.status(), NodeStatus::Unreachable);
        assert_eq!(listener.downs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_a_sweep_that_overruns_the_wait() {
        // a node that accepts and never responds, probed with a deadline
        // well past the stop wait, keeps a sweep in flight across stop()
        let hung = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hung_port = hung.local_addr().unwrap().port();
        let hung_task = tokio::spawn(async move {
            // hold accepted streams open so probes hang instead of
            // seeing an immediate close
            let mut streams = Vec::new();
            loop {
                if let Ok((stream, _)) = hung.accept().await {
                    streams.push(stream);
                }
            }
        });

        let registry = Arc::new(ClusterRegistry::new());
        let node = Arc::new(ClusterNode::new("hung", "127.0.0.1", hung_port));
        registry.register(node.clone());
        let status_manager = Arc::new(NodeStatusManager::new(registry.clone()));

        let prober = HeartbeatProber::new(
            registry,
            status_manager,
            Duration::from_millis(10),
            Duration::from_secs(8),
        );
        prober.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let before = node.last_heartbeat();

        prober.stop().await;
        assert!(!prober.is_running());

        // the overrunning sweep was cancelled, not detached: it never
        // reports its outcome after stop returns
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(node.last_heartbeat(), before);
        assert_eq!(node.status(), NodeStatus::Starting);

        hung_task.abort();
    }

    #[tokio::test]
    async fn test_hung_node_does_not_block_peers() {
        // a listener that accepts but never responds
        let hung = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hung_port = hung.local_addr().unwrap().port();
        let hung_task = tokio::spawn(async move {
            loop {
                let _ = hung.accept().await;
            }
        });
        let (live_addr, backend) = spawn_ping_backend().await;

        let registry = Arc::new(ClusterRegistry::new());
        let hung_node = Arc::new(ClusterNode::new("hung", "127.0.0.1", hung_port));
        let live_node = Arc::new(ClusterNode::new("live", "127.0.0.1", live_addr.port()));
        registry.register(hung_node.clone());
        registry.register(live_node.clone());
        let status_manager = Arc::new(NodeStatusManager::new(registry.clone()));

        let prober = HeartbeatProber::new(
            registry,
            status_manager,
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        prober.start();
        tokio::time::sleep(Duration::from_millis(600)).await;
        prober.stop().await;

        assert_eq!(live_node.status(), NodeStatus::Running);
        assert_eq!(hung_node.status(), NodeStatus::Unreachable);

        hung_task.abort();
        backend.abort();
    }
}
