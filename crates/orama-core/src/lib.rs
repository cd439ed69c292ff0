//! orama-core — shared foundation for the Orama deployment platform.
//!
//! Holds the domain types persisted by every node, the error taxonomy used
//! across the workspace, node configuration parsing, filesystem layout
//! helpers, and the content-store interface the core consumes.

pub mod config;
pub mod content;
pub mod error;
pub mod paths;
pub mod types;

pub use config::NodeConfig;
pub use content::{ContentStore, FsContentStore};
pub use error::{Error, ErrorKind, Result};
pub use types::*;

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
