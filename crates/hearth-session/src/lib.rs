//! Replicated HTTP sessions.
//!
//! A [`Session`] is a plain value persisted in the
//! [`ReplicatedSessionStore`], which mirrors every write and delete to the
//! other cluster members over the replication micro-format in [`wire`].
//! The [`SessionManager`] is the request-facing lifecycle API.

pub mod manager;
pub mod session;
pub mod store;
pub mod wire;

pub use manager::SessionManager;
pub use session::{Session, DEFAULT_MAX_INACTIVE_INTERVAL};
pub use store::{ReplicatedSessionStore, REPLICATION_PATH};
pub use wire::{decode_body, decode_session, encode_session, ReplicationAction};
