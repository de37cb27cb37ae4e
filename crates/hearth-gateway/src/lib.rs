//! The load-balancing gateway.
//!
//! [`GatewayServer`] accepts client connections, parses the request head
//! into a [`RequestWrapper`], asks a [`LoadBalancer`] for a healthy
//! backend and proxies the exchange, retrying other backends on failure.

pub mod balancer;
pub mod engine;
pub mod request;

pub use balancer::{
    balancer_for, LeastConnectionsBalancer, LoadBalancer, RoundRobinBalancer, StickyHashBalancer,
};
pub use engine::{GatewayServer, DEFAULT_MAX_CONCURRENCY};
pub use request::RequestWrapper;
