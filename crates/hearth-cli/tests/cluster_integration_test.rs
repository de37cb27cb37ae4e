//! End-to-end cluster test: two members with session replication behind
//! the sticky gateway.

use hearth_cluster::{ClusterNode, ClusterRegistry, NodeStatus};
use hearth_gateway::{GatewayServer, StickyHashBalancer};
use hearth_server::{router, AppState};
use hearth_session::{ReplicatedSessionStore, SessionManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct Member {
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
}

/// Boots one cluster member serving on a pre-bound listener, with the full
/// membership in its registry and itself marked current.
async fn boot_member(listener: TcpListener, own: usize, addrs: &[SocketAddr]) -> Member {
    let registry = Arc::new(ClusterRegistry::new());
    for (i, addr) in addrs.iter().enumerate() {
        let node = Arc::new(ClusterNode::new(
            format!("node{}", i + 1),
            "127.0.0.1",
            addr.port(),
        ));
        registry.register(node.clone());
        if i == own {
            registry.set_current_node(node);
        }
    }

    let store = Arc::new(ReplicatedSessionStore::new(registry));
    let sessions = Arc::new(SessionManager::new(store));
    let app = router(AppState {
        sessions: sessions.clone(),
    });
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Member { addr, sessions }
}

async fn roundtrip(addr: SocketAddr, raw: String) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

fn session_cookie(response: &str) -> String {
    response
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("set-cookie") {
                Some(value.trim().split(';').next().unwrap().to_string())
            } else {
                None
            }
        })
        .expect("response carries a session cookie")
}

#[tokio::test]
async fn sticky_session_survives_across_the_cluster() {
    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addrs = [
        listener_a.local_addr().unwrap(),
        listener_b.local_addr().unwrap(),
    ];
    let member_a = boot_member(listener_a, 0, &addrs).await;
    let member_b = boot_member(listener_b, 1, &addrs).await;

    let gateway_registry = Arc::new(ClusterRegistry::new());
    for (i, addr) in addrs.iter().enumerate() {
        let node = Arc::new(ClusterNode::new(
            format!("node{}", i + 1),
            "127.0.0.1",
            addr.port(),
        ));
        node.set_status(NodeStatus::Running);
        gateway_registry.register(node);
    }
    let gateway = GatewayServer::new(gateway_registry, Arc::new(StickyHashBalancer));
    let gateway_addr = gateway
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    // first visit creates a session on whichever member gets picked
    let first = roundtrip(
        gateway_addr,
        "GET / HTTP/1.1\r\nHost: t\r\n\r\n".to_string(),
    )
    .await;
    assert!(first.contains("HTTP/1.1 200 OK"));
    assert!(first.contains("visits=1"));
    let cookie = session_cookie(&first);
    let session_id = cookie.strip_prefix("JSESSIONID=").unwrap().to_string();

    // subsequent visits with the cookie stick and keep counting
    for expected in 2..=4 {
        let response = roundtrip(
            gateway_addr,
            format!("GET / HTTP/1.1\r\nHost: t\r\nCookie: {}\r\n\r\n", cookie),
        )
        .await;
        assert!(response.contains(&format!("visits={}", expected)));
    }

    // the session was replicated to both members
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(member_a.sessions.store().load(&session_id).is_some());
    assert!(member_b.sessions.store().load(&session_id).is_some());

    gateway.stop().await;
}

#[tokio::test]
async fn gateway_routes_around_a_dead_member() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let member = boot_member(listener, 0, &[addr]).await;

    // one real member plus one that refuses connections
    let ghost = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ghost_port = ghost.local_addr().unwrap().port();
    drop(ghost);

    let registry = Arc::new(ClusterRegistry::new());
    for (name, port) in [("live", member.addr.port()), ("ghost", ghost_port)] {
        let node = Arc::new(ClusterNode::new(name, "127.0.0.1", port));
        node.set_status(NodeStatus::Running);
        registry.register(node);
    }
    let gateway = GatewayServer::new(registry, Arc::new(StickyHashBalancer));
    let gateway_addr = gateway
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    // every request lands on the live member, whichever node is selected
    for _ in 0..4 {
        let response = roundtrip(
            gateway_addr,
            "GET /ping HTTP/1.1\r\nHost: t\r\n\r\n".to_string(),
        )
        .await;
        assert!(response.contains("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK"));
    }

    gateway.stop().await;
}
