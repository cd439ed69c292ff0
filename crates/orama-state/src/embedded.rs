//! EmbeddedStore — redb-backed implementation of [`StateStore`].
//!
//! Serves standalone nodes and tests. redb write transactions are
//! serializable, so the conditional-insert pattern used for unique keys
//! gives the same observable behavior as the replicated SQL cluster's
//! unique constraints: the second writer of a contended key sees
//! `AlreadyExists`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use orama_core::{
    Deployment, Error, HistoryEntry, HomeNodeAssignment, NodeRecord, PortAllocation, Replica,
    Result,
};

use crate::store::StateStore;
use crate::tables::*;

/// Convert any backend error into the storage-unavailable kind.
macro_rules! store_err {
    () => {
        |e| Error::storage_unavailable(e.to_string())
    };
}

/// Thread-safe embedded state store backed by redb.
#[derive(Clone)]
pub struct EmbeddedStore {
    db: Arc<Database>,
}

impl EmbeddedStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(store_err!())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "embedded state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(store_err!())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err!())?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(store_err!())?;
        txn.open_table(DEPLOYMENT_NAMES).map_err(store_err!())?;
        txn.open_table(REPLICAS).map_err(store_err!())?;
        txn.open_table(PORT_ALLOCATIONS).map_err(store_err!())?;
        txn.open_table(HOME_NODE_ASSIGNMENTS).map_err(store_err!())?;
        txn.open_table(DEPLOYMENT_HISTORY).map_err(store_err!())?;
        txn.open_table(NODES).map_err(store_err!())?;
        txn.commit().map_err(store_err!())?;
        Ok(())
    }

    /// Read one JSON row from a table.
    fn read_row<T: serde::de::DeserializeOwned>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<T>> {
        let txn = self.db.begin_read().map_err(store_err!())?;
        let table = txn.open_table(table).map_err(store_err!())?;
        match table.get(key).map_err(store_err!())? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Read every JSON row whose key starts with `prefix`, in key order.
    fn read_prefix<T: serde::de::DeserializeOwned>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        prefix: &str,
    ) -> Result<Vec<T>> {
        let txn = self.db.begin_read().map_err(store_err!())?;
        let table = txn.open_table(table).map_err(store_err!())?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(store_err!())? {
            let (key, value) = entry.map_err(store_err!())?;
            if key.value().starts_with(prefix) {
                results.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(results)
    }

    /// Overwrite one JSON row unconditionally.
    fn write_row<T: serde::Serialize>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let txn = self.db.begin_write().map_err(store_err!())?;
        {
            let mut table = txn.open_table(table).map_err(store_err!())?;
            table
                .insert(key, bytes.as_slice())
                .map_err(store_err!())?;
        }
        txn.commit().map_err(store_err!())?;
        Ok(())
    }

    /// Insert one JSON row iff the key is free; `AlreadyExists` otherwise.
    fn insert_row<T: serde::Serialize>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
        what: &str,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let txn = self.db.begin_write().map_err(store_err!())?;
        {
            let mut table = txn.open_table(table).map_err(store_err!())?;
            if table.get(key).map_err(store_err!())?.is_some() {
                return Err(Error::already_exists(format!("{what} {key} already exists")));
            }
            table
                .insert(key, bytes.as_slice())
                .map_err(store_err!())?;
        }
        txn.commit().map_err(store_err!())?;
        Ok(())
    }

    /// Delete every row whose key starts with `prefix`. Returns count.
    fn delete_prefix(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        prefix: &str,
    ) -> Result<u32> {
        let txn = self.db.begin_write().map_err(store_err!())?;
        let count;
        {
            let mut table = txn.open_table(table).map_err(store_err!())?;
            let keys: Vec<String> = table
                .iter()
                .map_err(store_err!())?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(prefix).then_some(k)
                })
                .collect();
            count = keys.len() as u32;
            for key in &keys {
                table.remove(key.as_str()).map_err(store_err!())?;
            }
        }
        txn.commit().map_err(store_err!())?;
        Ok(count)
    }
}

#[async_trait]
impl StateStore for EmbeddedStore {
    // ── Deployments ────────────────────────────────────────────────

    async fn insert_deployment(&self, deployment: &Deployment) -> Result<()> {
        let bytes = serde_json::to_vec(deployment)?;
        let nkey = name_key(&deployment.namespace, &deployment.name);
        let txn = self.db.begin_write().map_err(store_err!())?;
        {
            let mut names = txn.open_table(DEPLOYMENT_NAMES).map_err(store_err!())?;
            if names.get(nkey.as_str()).map_err(store_err!())?.is_some() {
                return Err(Error::already_exists(format!(
                    "deployment {nkey} already exists"
                )));
            }
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(store_err!())?;
            if deployments
                .get(deployment.id.as_str())
                .map_err(store_err!())?
                .is_some()
            {
                return Err(Error::already_exists(format!(
                    "deployment id {} already exists",
                    deployment.id
                )));
            }
            deployments
                .insert(deployment.id.as_str(), bytes.as_slice())
                .map_err(store_err!())?;
            names
                .insert(nkey.as_str(), deployment.id.as_str())
                .map_err(store_err!())?;
        }
        txn.commit().map_err(store_err!())?;
        debug!(id = %deployment.id, key = %nkey, "deployment stored");
        Ok(())
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        let bytes = serde_json::to_vec(deployment)?;
        let txn = self.db.begin_write().map_err(store_err!())?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(store_err!())?;
            if table
                .get(deployment.id.as_str())
                .map_err(store_err!())?
                .is_none()
            {
                return Err(Error::not_found(format!(
                    "deployment {} not found",
                    deployment.id
                )));
            }
            table
                .insert(deployment.id.as_str(), bytes.as_slice())
                .map_err(store_err!())?;
        }
        txn.commit().map_err(store_err!())?;
        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>> {
        self.read_row(DEPLOYMENTS, id)
    }

    async fn get_deployment_by_name(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>> {
        let nkey = name_key(namespace, name);
        let id = {
            let txn = self.db.begin_read().map_err(store_err!())?;
            let names = txn.open_table(DEPLOYMENT_NAMES).map_err(store_err!())?;
            match names.get(nkey.as_str()).map_err(store_err!())? {
                Some(guard) => guard.value().to_string(),
                None => return Ok(None),
            }
        };
        self.read_row(DEPLOYMENTS, &id)
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let all: Vec<Deployment> = self.read_prefix(DEPLOYMENTS, "")?;
        Ok(all
            .into_iter()
            .filter(|d| d.namespace == namespace)
            .collect())
    }

    async fn delete_deployment(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(store_err!())?;
        let existed;
        {
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(store_err!())?;
            let nkey = match deployments.remove(id).map_err(store_err!())? {
                Some(guard) => {
                    let deployment: Deployment = serde_json::from_slice(guard.value())?;
                    existed = true;
                    Some(name_key(&deployment.namespace, &deployment.name))
                }
                None => {
                    existed = false;
                    None
                }
            };
            if let Some(nkey) = nkey {
                let mut names = txn.open_table(DEPLOYMENT_NAMES).map_err(store_err!())?;
                names.remove(nkey.as_str()).map_err(store_err!())?;
            }
        }
        txn.commit().map_err(store_err!())?;
        debug!(%id, existed, "deployment deleted");
        Ok(existed)
    }

    // ── Replicas ───────────────────────────────────────────────────

    async fn upsert_replica(&self, replica: &Replica) -> Result<()> {
        self.write_row(REPLICAS, &replica.table_key(), replica)
    }

    async fn get_replica(&self, deployment_id: &str, node_id: &str) -> Result<Option<Replica>> {
        self.read_row(REPLICAS, &replica_key(deployment_id, node_id))
    }

    async fn list_replicas(&self, deployment_id: &str) -> Result<Vec<Replica>> {
        self.read_prefix(REPLICAS, &format!("{deployment_id}:"))
    }

    async fn delete_replicas(&self, deployment_id: &str) -> Result<u32> {
        self.delete_prefix(REPLICAS, &format!("{deployment_id}:"))
    }

    // ── Port allocations ───────────────────────────────────────────

    async fn insert_port_allocation(&self, allocation: &PortAllocation) -> Result<()> {
        self.insert_row(
            PORT_ALLOCATIONS,
            &port_key(&allocation.node_id, allocation.port),
            allocation,
            "port",
        )
    }

    async fn list_ports(&self, node_id: &str) -> Result<Vec<u16>> {
        // Keys are zero-padded, so key order is numeric order.
        let rows: Vec<PortAllocation> =
            self.read_prefix(PORT_ALLOCATIONS, &format!("{node_id}:"))?;
        Ok(rows.into_iter().map(|a| a.port).collect())
    }

    async fn count_ports(&self, node_id: &str) -> Result<u32> {
        Ok(self.list_ports(node_id).await?.len() as u32)
    }

    async fn delete_port_allocations(&self, deployment_id: &str) -> Result<u32> {
        let txn = self.db.begin_write().map_err(store_err!())?;
        let count;
        {
            let mut table = txn.open_table(PORT_ALLOCATIONS).map_err(store_err!())?;
            let keys: Vec<String> = table
                .iter()
                .map_err(store_err!())?
                .filter_map(|entry| {
                    let (key, value) = entry.ok()?;
                    let allocation: PortAllocation = serde_json::from_slice(value.value()).ok()?;
                    (allocation.deployment_id == deployment_id)
                        .then(|| key.value().to_string())
                })
                .collect();
            count = keys.len() as u32;
            for key in &keys {
                table.remove(key.as_str()).map_err(store_err!())?;
            }
        }
        txn.commit().map_err(store_err!())?;
        Ok(count)
    }

    // ── Home node assignments ──────────────────────────────────────

    async fn insert_assignment(&self, assignment: &HomeNodeAssignment) -> Result<()> {
        self.insert_row(
            HOME_NODE_ASSIGNMENTS,
            &assignment.namespace,
            assignment,
            "assignment for",
        )
    }

    async fn update_assignment(&self, assignment: &HomeNodeAssignment) -> Result<()> {
        let bytes = serde_json::to_vec(assignment)?;
        let txn = self.db.begin_write().map_err(store_err!())?;
        {
            let mut table = txn.open_table(HOME_NODE_ASSIGNMENTS).map_err(store_err!())?;
            if table
                .get(assignment.namespace.as_str())
                .map_err(store_err!())?
                .is_none()
            {
                return Err(Error::not_found(format!(
                    "namespace {} has no assignment",
                    assignment.namespace
                )));
            }
            table
                .insert(assignment.namespace.as_str(), bytes.as_slice())
                .map_err(store_err!())?;
        }
        txn.commit().map_err(store_err!())?;
        Ok(())
    }

    async fn get_assignment(&self, namespace: &str) -> Result<Option<HomeNodeAssignment>> {
        self.read_row(HOME_NODE_ASSIGNMENTS, namespace)
    }

    async fn list_assignments(&self) -> Result<Vec<HomeNodeAssignment>> {
        self.read_prefix(HOME_NODE_ASSIGNMENTS, "")
    }

    // ── Deployment history ─────────────────────────────────────────

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        self.insert_row(
            DEPLOYMENT_HISTORY,
            &history_key(&entry.deployment_id, entry.version),
            entry,
            "history entry",
        )
    }

    async fn get_history(
        &self,
        deployment_id: &str,
        version: u64,
    ) -> Result<Option<HistoryEntry>> {
        self.read_row(DEPLOYMENT_HISTORY, &history_key(deployment_id, version))
    }

    async fn list_history(&self, deployment_id: &str) -> Result<Vec<HistoryEntry>> {
        // Zero-padded version keys keep the scan in version order.
        self.read_prefix(DEPLOYMENT_HISTORY, &format!("{deployment_id}:"))
    }

    async fn delete_history(&self, deployment_id: &str) -> Result<u32> {
        self.delete_prefix(DEPLOYMENT_HISTORY, &format!("{deployment_id}:"))
    }

    // ── Node registry ──────────────────────────────────────────────

    async fn upsert_node(&self, node: &NodeRecord) -> Result<()> {
        self.write_row(NODES, &node.id, node)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>> {
        self.read_row(NODES, node_id)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        self.read_prefix(NODES, "")
    }
}
