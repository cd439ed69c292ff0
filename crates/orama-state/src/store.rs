//! The storage interface consumed by the orchestration core.
//!
//! All inter-node coordination rides on this trait's semantics: the
//! backing store is linearizable, and the `insert_*` operations enforce
//! the unique keys documented per method, failing with
//! [`orama_core::ErrorKind::AlreadyExists`] when a concurrent writer got
//! there first. Implementations must not rely on in-memory locks for
//! these guarantees — any node may write rows for any other node.

use async_trait::async_trait;

use orama_core::{
    Deployment, HistoryEntry, HomeNodeAssignment, NodeRecord, PortAllocation, Replica, Result,
};

#[async_trait]
pub trait StateStore: Send + Sync {
    // ── Deployments ────────────────────────────────────────────────

    /// Insert a new deployment. Unique on `id` and on `(namespace, name)`.
    async fn insert_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Overwrite an existing deployment. `NotFound` if absent.
    async fn update_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>>;

    async fn get_deployment_by_name(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>>;

    /// Delete a deployment and its name-index row. Returns true if it existed.
    async fn delete_deployment(&self, id: &str) -> Result<bool>;

    // ── Replicas ───────────────────────────────────────────────────

    /// Insert or update a replica row, keyed `(deployment_id, node_id)`.
    async fn upsert_replica(&self, replica: &Replica) -> Result<()>;

    async fn get_replica(&self, deployment_id: &str, node_id: &str) -> Result<Option<Replica>>;

    async fn list_replicas(&self, deployment_id: &str) -> Result<Vec<Replica>>;

    /// Remove every replica row for a deployment. Returns number removed.
    async fn delete_replicas(&self, deployment_id: &str) -> Result<u32>;

    // ── Port allocations ───────────────────────────────────────────

    /// Reserve a port. Unique on `(node_id, port)` — `AlreadyExists` means
    /// a peer raced this reservation.
    async fn insert_port_allocation(&self, allocation: &PortAllocation) -> Result<()>;

    /// Ports currently reserved on a node, ascending.
    async fn list_ports(&self, node_id: &str) -> Result<Vec<u16>>;

    async fn count_ports(&self, node_id: &str) -> Result<u32>;

    /// Release every port held by a deployment, on every node. Idempotent;
    /// returns number released.
    async fn delete_port_allocations(&self, deployment_id: &str) -> Result<u32>;

    // ── Home node assignments ──────────────────────────────────────

    /// Claim a namespace. Unique on `namespace` — `AlreadyExists` means a
    /// peer won the assignment race.
    async fn insert_assignment(&self, assignment: &HomeNodeAssignment) -> Result<()>;

    /// Overwrite an existing assignment. `NotFound` if absent.
    async fn update_assignment(&self, assignment: &HomeNodeAssignment) -> Result<()>;

    async fn get_assignment(&self, namespace: &str) -> Result<Option<HomeNodeAssignment>>;

    async fn list_assignments(&self) -> Result<Vec<HomeNodeAssignment>>;

    // ── Deployment history ─────────────────────────────────────────

    /// Append a history row. Unique on `(deployment_id, version)`.
    async fn append_history(&self, entry: &HistoryEntry) -> Result<()>;

    async fn get_history(&self, deployment_id: &str, version: u64)
        -> Result<Option<HistoryEntry>>;

    /// All history rows for a deployment, ascending by version.
    async fn list_history(&self, deployment_id: &str) -> Result<Vec<HistoryEntry>>;

    async fn delete_history(&self, deployment_id: &str) -> Result<u32>;

    // ── Node registry ──────────────────────────────────────────────

    async fn upsert_node(&self, node: &NodeRecord) -> Result<()>;

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>>;

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>>;
}
