//! redb table definitions for the embedded state backend.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys are `{parent}:{child}`; numeric key components
//! are zero-padded so lexicographic key order matches numeric order.

use redb::TableDefinition;

/// Deployments keyed by `{id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Unique name index: `{namespace}/{name}` → deployment id.
pub const DEPLOYMENT_NAMES: TableDefinition<&str, &str> =
    TableDefinition::new("deployment_names");

/// Replicas keyed by `{deployment_id}:{node_id}`.
pub const REPLICAS: TableDefinition<&str, &[u8]> = TableDefinition::new("replicas");

/// Port allocations keyed by `{node_id}:{port:05}`.
pub const PORT_ALLOCATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("port_allocations");

/// Home node assignments keyed by `{namespace}`.
pub const HOME_NODE_ASSIGNMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("home_node_assignments");

/// History entries keyed by `{deployment_id}:{version:010}`.
pub const DEPLOYMENT_HISTORY: TableDefinition<&str, &[u8]> =
    TableDefinition::new("deployment_history");

/// Node registry keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Composite key for a replica row.
pub fn replica_key(deployment_id: &str, node_id: &str) -> String {
    format!("{deployment_id}:{node_id}")
}

/// Composite key for a port allocation row.
pub fn port_key(node_id: &str, port: u16) -> String {
    format!("{node_id}:{port:05}")
}

/// Composite key for a history row.
pub fn history_key(deployment_id: &str, version: u64) -> String {
    format!("{deployment_id}:{version:010}")
}

/// Composite key for the deployment name index.
pub fn name_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
