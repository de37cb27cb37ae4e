//! # Hearth CLI Entry Point
//!
//! Main binary for the Hearth application-server cluster. Runs either a
//! cluster member (`server`) or the load-balancing front door (`gateway`).
//!
//! ## Usage
//!
//! ```bash
//! # Start a cluster member named node1
//! hearth server -b 0.0.0.0:8080 -c cluster.xml --name node1
//!
//! # Start the gateway with sticky-session routing
//! hearth gateway -b 0.0.0.0:8090 -c cluster.xml --strategy sticky
//! ```

use anyhow::Result;
use argh::FromArgs;
use hearth_cluster::{
    ClusterConfig, ClusterNode, ClusterRegistry, HeartbeatProber, LoggingStatusListener,
    NodeStatusManager,
};
use hearth_gateway::{balancer_for, GatewayServer};
use hearth_server::AppState;
use hearth_session::{ReplicatedSessionStore, SessionManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(FromArgs)]
/// Hearth - clustered application server with session replication
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Server(ServerArgs),
    Gateway(GatewayArgs),
}

/// Arguments for starting a cluster member.
///
/// A member serves application traffic, answers heartbeat probes on
/// `/ping`, accepts session replication from its peers and probes the
/// rest of the cluster itself.
#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
/// start a cluster member
struct ServerArgs {
    /// address to bind the member's HTTP server to
    #[argh(option, short = 'b', default = "\"0.0.0.0:8080\".into()")]
    bind: String,

    /// path to the XML cluster descriptor
    ///
    /// A missing or invalid file falls back to the default single-node
    /// configuration.
    #[argh(option, short = 'c', default = "\"cluster.xml\".into()")]
    config: String,

    /// name of this member in the cluster descriptor
    ///
    /// The matching node entry is marked as the current node and excluded
    /// from replication fan-out.
    #[argh(option, long = "name", default = "\"node1\".into()")]
    name: String,
}

/// Arguments for starting the gateway.
///
/// The gateway is not a cluster member: it probes the configured nodes,
/// load-balances inbound requests across the healthy ones and proxies
/// the responses back.
#[derive(FromArgs)]
#[argh(subcommand, name = "gateway")]
/// start the load-balancing gateway
struct GatewayArgs {
    /// address to bind the gateway to
    #[argh(option, short = 'b', default = "\"0.0.0.0:8090\".into()")]
    bind: String,

    /// path to the XML cluster descriptor
    #[argh(option, short = 'c', default = "\"cluster.xml\".into()")]
    config: String,

    /// load-balancing strategy: round-robin, least-conn or sticky
    #[argh(option, long = "strategy", default = "\"round-robin\".into()")]
    strategy: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // default log level INFO, RUST_LOG overrides
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Gateway(args) => run_gateway(args).await,
    }
}

/// Builds the registry and failure-detection stack shared by both modes.
fn build_cluster(
    config: &ClusterConfig,
) -> (Arc<ClusterRegistry>, Arc<NodeStatusManager>, HeartbeatProber) {
    let registry = Arc::new(ClusterRegistry::new());
    for node_config in &config.nodes {
        registry.register(Arc::new(ClusterNode::new(
            node_config.name.clone(),
            node_config.host.clone(),
            node_config.port,
        )));
    }
    let status_manager = Arc::new(NodeStatusManager::new(registry.clone()));
    status_manager.add_listener("logging", Arc::new(LoggingStatusListener));
    let prober = HeartbeatProber::new(
        registry.clone(),
        status_manager.clone(),
        Duration::from_millis(config.heartbeat_interval_ms),
        Duration::from_millis(config.heartbeat_timeout_ms),
    );
    (registry, status_manager, prober)
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;

    let config = ClusterConfig::load(&args.config);
    tracing::info!(
        "Starting cluster member {} of cluster {}",
        args.name,
        config.name
    );

    let (registry, _status_manager, prober) = build_cluster(&config);
    let current = registry
        .list_all()
        .into_iter()
        .find(|n| n.name == args.name)
        .ok_or_else(|| {
            anyhow::anyhow!("No node named {} in cluster {}", args.name, config.name)
        })?;
    registry.set_current_node(current);

    let store = Arc::new(ReplicatedSessionStore::new(registry.clone()));
    let sessions = Arc::new(SessionManager::new(store));
    let state = AppState { sessions };

    prober.start();

    tokio::select! {
        result = hearth_server::run(addr, state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    prober.stop().await;
    Ok(())
}

async fn run_gateway(args: GatewayArgs) -> Result<()> {
    let addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;
    let balancer = balancer_for(&args.strategy).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown strategy {}: expected round-robin, least-conn or sticky",
            args.strategy
        )
    })?;

    let config = ClusterConfig::load(&args.config);
    tracing::info!(
        "Starting gateway for cluster {} with strategy {}",
        config.name,
        args.strategy
    );

    let (registry, _status_manager, prober) = build_cluster(&config);
    prober.start();

    let gateway = GatewayServer::new(registry, balancer);
    gateway.start(addr).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    gateway.stop().await;
    prober.stop().await;
    Ok(())
}
