//! Cluster membership and failure detection.
//!
//! The building blocks of a running cluster member: the [`ClusterRegistry`]
//! directory of nodes, the [`HeartbeatProber`] that pings each of them, the
//! [`NodeStatusManager`] that turns probe outcomes into availability
//! transitions, and the XML [`ClusterConfig`] the whole thing is wired from.

pub mod config;
pub mod detector;
pub mod error;
pub mod heartbeat;
pub mod node;
pub mod registry;

pub use config::{ClusterConfig, NodeConfig};
pub use detector::{LoggingStatusListener, NodeStatusManager, StatusListener};
pub use error::{HearthError, Result};
pub use heartbeat::HeartbeatProber;
pub use node::{ClusterNode, NodeStatus};
pub use registry::ClusterRegistry;
