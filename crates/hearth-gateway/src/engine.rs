use crate::balancer::LoadBalancer;
use crate::request::RequestWrapper;
use hearth_cluster::{ClusterNode, ClusterRegistry, HearthError, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Forwarding attempts per request, each against a not-yet-failed node.
const MAX_RETRIES: usize = 3;

/// Per-attempt budget covering connect, send and response read.
const FORWARD_TIMEOUT: Duration = Duration::from_millis(1000);

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_CONCURRENCY: usize = 256;

/// The reverse-proxying front door.
///
/// Accepts raw TCP connections, parses the request head, picks a healthy
/// backend through the configured balancer and copies the backend's
/// response back verbatim. A failed attempt excludes that node and retries
/// with the remainder, up to [`MAX_RETRIES`] attempts. Concurrency is
/// bounded by a semaphore; at the limit the acceptor blocks rather than
/// shedding connections.
pub struct GatewayServer {
    registry: Arc<ClusterRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    semaphore: Arc<Semaphore>,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl GatewayServer {
    pub fn new(registry: Arc<ClusterRegistry>, balancer: Arc<dyn LoadBalancer>) -> Self {
        Self::with_max_concurrency(registry, balancer, DEFAULT_MAX_CONCURRENCY)
    }

    pub fn with_max_concurrency(
        registry: Arc<ClusterRegistry>,
        balancer: Arc<dyn LoadBalancer>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            balancer,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            task: Mutex::new(None),
        }
    }

    /// Binds `addr` and starts the accept loop. Returns the bound address,
    /// which differs from `addr` when port 0 was requested. Starting a
    /// running gateway is a no-op returning the requested address.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr> {
        {
            let task = self.task.lock();
            if task.is_some() {
                return Ok(addr);
            }
        }
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("gateway listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = self.registry.clone();
        let balancer = self.balancer.clone();
        let semaphore = self.semaphore.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!("gateway accept loop shutting down");
                        break;
                    }
                    next = accept_next(&listener, &semaphore) => {
                        let (stream, permit) = match next {
                            Some(pair) => pair,
                            None => break,
                        };
                        let registry = registry.clone();
                        let balancer = balancer.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, registry, balancer).await;
                            drop(permit);
                        });
                    }
                }
            }
        });

        *self.task.lock() = Some((shutdown_tx, handle));
        Ok(local_addr)
    }

    /// Stops the accept loop, waiting up to five seconds before aborting.
    /// In-flight connections run to completion on their own tasks.
    pub async fn stop(&self) {
        let taken = self.task.lock().take();
        if let Some((shutdown_tx, handle)) = taken {
            let _ = shutdown_tx.send(true);
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!("gateway did not stop in time, cancelling");
                abort.abort();
            }
            info!("gateway stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

/// Waits for a concurrency permit, then for a connection. Accept errors
/// (ECONNABORTED, EMFILE and the like) are logged and skipped; the loop
/// must outlive them. Returns `None` only if the semaphore is closed.
async fn accept_next(
    listener: &TcpListener,
    semaphore: &Arc<Semaphore>,
) -> Option<(TcpStream, tokio::sync::OwnedSemaphorePermit)> {
    loop {
        let permit = semaphore.clone().acquire_owned().await.ok()?;
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("accepted connection from {}", peer);
                return Some((stream, permit));
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                drop(permit);
                // short pause so a persistent error cannot spin the loop
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<ClusterRegistry>,
    balancer: Arc<dyn LoadBalancer>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = match RequestWrapper::parse(&mut reader).await {
        Some(request) => request,
        None => {
            send_error(&mut write_half, 400, "Bad Request").await;
            return;
        }
    };
    debug!("routing {} {}", request.method, request.uri);

    match forward_with_retries(&request, &registry, &balancer).await {
        Ok(response) => {
            if let Err(e) = write_half.write_all(&response).await {
                debug!("client went away mid-response: {}", e);
            }
        }
        Err(HearthError::NoHealthyNodes) => {
            send_error(&mut write_half, 503, "No available backend servers").await;
        }
        Err(HearthError::AllAttemptsFailed) => {
            send_error(&mut write_half, 502, "Bad Gateway").await;
        }
        Err(e) => {
            error!("unexpected forwarding failure: {}", e);
            send_error(&mut write_half, 500, "Internal Server Error").await;
        }
    }
    let _ = write_half.shutdown().await;
}

/// The retry loop: selects from a shrinking candidate list, excluding each
/// failed node, until an attempt succeeds or the attempts run out.
async fn forward_with_retries(
    request: &RequestWrapper,
    registry: &Arc<ClusterRegistry>,
    balancer: &Arc<dyn LoadBalancer>,
) -> Result<Vec<u8>> {
    let mut candidates = registry.list_healthy();
    if candidates.is_empty() {
        return Err(HearthError::NoHealthyNodes);
    }

    for attempt in 1..=MAX_RETRIES {
        let node = match balancer.select_node(request, &candidates) {
            Some(node) => node,
            None => break,
        };

        node.increment_connections();
        let outcome = forward_once(request, &node).await;
        node.decrement_connections();

        match outcome {
            Ok(response) => return Ok(response),
            Err(e) => {
                warn!(
                    "attempt {}/{} via {} ({}:{}) failed: {}",
                    attempt, MAX_RETRIES, node.name, node.host, node.port, e
                );
                candidates.retain(|c| c.id() != node.id());
                if candidates.is_empty() {
                    break;
                }
            }
        }
    }
    Err(HearthError::AllAttemptsFailed)
}

/// One proxied exchange: send the request head to `node`, collect the
/// response, serialize it back into raw HTTP/1.1 bytes. Bodies of inbound
/// requests are not forwarded.
async fn forward_once(request: &RequestWrapper, node: &Arc<ClusterNode>) -> Result<Vec<u8>> {
    let url = format!("http://{}:{}{}", node.host, node.port, request.uri);
    let mut builder = hyper::Request::builder()
        .method(request.method.as_str())
        .uri(&url);
    for header_line in &request.headers {
        if let Some((name, value)) = header_line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("connection")
            {
                continue;
            }
            builder = builder.header(name, value.trim());
        }
    }
    let outbound = builder
        .body(Full::new(Bytes::new()))
        .map_err(|e| HearthError::Proxy(format!("failed to build request: {}", e)))?;

    let client = Client::builder(TokioExecutor::new()).build_http();
    // the deadline covers the whole exchange: a backend stalling mid-body
    // fails this attempt instead of pinning a worker
    let exchange = async {
        let response = client
            .request(outbound)
            .await
            .map_err(|e| HearthError::Proxy(e.to_string()))?;
        let status = response.status();
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| HearthError::Proxy(format!("failed to read backend body: {}", e)))?
            .to_bytes();
        Ok::<_, HearthError>((status, parts, body))
    };
    let (status, parts, body) = tokio::time::timeout(FORWARD_TIMEOUT, exchange)
        .await
        .map_err(|_| HearthError::Timeout(FORWARD_TIMEOUT.as_millis() as u64))??;

    let mut out = Vec::with_capacity(body.len() + 256);
    out.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in parts.headers.iter() {
        if name == header::CONTENT_LENGTH
            || name == header::TRANSFER_ENCODING
            || name == header::CONNECTION
        {
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(&body);
    Ok(out)
}

/// Writes a minimal error response; the message doubles as the reason
/// phrase and the body.
async fn send_error<W: AsyncWrite + Unpin>(writer: &mut W, code: u16, message: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        code,
        message,
        message.len(),
        message
    );
    if let Err(e) = writer.write_all(response.as_bytes()).await {
        debug!("could not write error response: {}", e);
    }
}
