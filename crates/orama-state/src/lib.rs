//! orama-state — placement state shared by every node.
//!
//! The core consumes storage through the [`StateStore`] trait. Production
//! nodes point it at the replicated SQL cluster, which provides
//! linearizable reads/writes and unique-constraint enforcement; this crate
//! ships [`EmbeddedStore`], a redb-backed single-node backend with the same
//! contract, used by standalone nodes and as the explicit storage mock in
//! tests (`open_in_memory`).
//!
//! Unique constraints are the coordination primitive: conditional inserts
//! surface [`orama_core::ErrorKind::AlreadyExists`], which callers such as
//! the port allocator treat as "a peer raced me".

pub mod embedded;
pub mod store;
pub mod tables;

pub use embedded::EmbeddedStore;
pub use store::StateStore;
