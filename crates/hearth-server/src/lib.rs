//! The HTTP surface of one cluster member: the heartbeat `/ping` target,
//! the `/_sessionReplication` peer endpoint and a session demo page.

pub mod app;

pub use app::{router, AppState};

use hearth_cluster::Result;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Binds `addr` and serves the application until the task is cancelled.
pub async fn run(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("node server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
