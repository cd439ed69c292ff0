//! orama-replica — node-to-node replica coordination.
//!
//! Four internal endpoints (`replica/setup`, `replica/update`,
//! `replica/rollback`, `replica/teardown`) let the orchestrator drive
//! deployment lifecycle on peer nodes. The crate has three layers:
//!
//! - [`actions::ReplicaHost`] — what the operations actually do on the
//!   local node (port allocation, bundle staging, atomic swap, process
//!   lifecycle, replica rows)
//! - [`routes`] — the inbound axum handlers, guarded by the internal
//!   auth header
//! - [`client::PeerClient`] — the outbound half used for fanout
//!
//! The orchestrator calls `ReplicaHost` directly when the target is the
//! local node and `PeerClient` otherwise, so both paths share one
//! implementation of the semantics.

pub mod actions;
pub mod bundle;
pub mod client;
pub mod protocol;
pub mod routes;

pub use actions::{HEALTH_WAIT_DYNAMIC, HEALTH_WAIT_STATIC, ReplicaHost};
pub use client::PeerClient;
pub use protocol::*;
pub use routes::{ReplicaState, replica_router, status_for};
