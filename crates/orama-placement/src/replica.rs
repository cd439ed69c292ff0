//! Replica selection and lifecycle.
//!
//! Given a primary node, picks the best-scoring peers for additional
//! replicas and tracks replica rows in the store. Selection is a single
//! descending sort over the current capacity snapshot — picked nodes are
//! not rescored, which is equivalent for our tie-break rule and avoids
//! the quadratic rescan.

use std::sync::Arc;

use tracing::{debug, info};

use orama_core::{Error, NodeId, Replica, ReplicaStatus, Result, epoch_secs};
use orama_state::StateStore;

use crate::score::{ScoringWeights, rank_nodes, schedulable_usages};

/// Total replicas per deployment (primary included) unless configured.
pub const DEFAULT_REPLICA_COUNT: u32 = 2;

/// Selects replica nodes and manages replica rows.
#[derive(Clone)]
pub struct ReplicaManager {
    store: Arc<dyn StateStore>,
    weights: ScoringWeights,
}

impl ReplicaManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            weights: ScoringWeights::default(),
        }
    }

    /// Pick up to `count` distinct peers for secondary replicas, best
    /// capacity first. The primary is excluded; fewer are returned when
    /// the fleet is smaller.
    pub async fn select_replica_nodes(&self, primary: &str, count: u32) -> Result<Vec<NodeId>> {
        let usages: Vec<_> = schedulable_usages(self.store.as_ref())
            .await?
            .into_iter()
            .filter(|u| u.node_id != primary)
            .collect();

        let picked: Vec<NodeId> = rank_nodes(&usages, &self.weights)
            .into_iter()
            .take(count as usize)
            .map(|s| s.node_id)
            .collect();

        debug!(primary, requested = count, selected = picked.len(), "replica nodes selected");
        Ok(picked)
    }

    /// Insert or update the replica row for `(deployment_id, node_id)`.
    ///
    /// At most one replica per deployment may be primary; promoting a
    /// second node while another primary exists is a conflict.
    pub async fn create_replica(
        &self,
        deployment_id: &str,
        node_id: &str,
        port: u16,
        is_primary: bool,
    ) -> Result<()> {
        if is_primary {
            let existing_primary = self
                .store
                .list_replicas(deployment_id)
                .await?
                .into_iter()
                .find(|r| r.is_primary && r.node_id != node_id);
            if let Some(other) = existing_primary {
                return Err(Error::conflict(format!(
                    "deployment {deployment_id} already has a primary replica on {}",
                    other.node_id
                )));
            }
        }

        let now = epoch_secs();
        let created_at = self
            .store
            .get_replica(deployment_id, node_id)
            .await?
            .map(|r| r.created_at)
            .unwrap_or(now);

        self.store
            .upsert_replica(&Replica {
                deployment_id: deployment_id.to_string(),
                node_id: node_id.to_string(),
                port,
                status: ReplicaStatus::Pending,
                is_primary,
                created_at,
                updated_at: now,
            })
            .await?;
        info!(deployment = %deployment_id, node = %node_id, port, is_primary, "replica recorded");
        Ok(())
    }

    pub async fn get_replicas(&self, deployment_id: &str) -> Result<Vec<Replica>> {
        self.store.list_replicas(deployment_id).await
    }

    /// Nodes whose replica of this deployment is currently active.
    pub async fn active_replica_nodes(&self, deployment_id: &str) -> Result<Vec<NodeId>> {
        Ok(self
            .store
            .list_replicas(deployment_id)
            .await?
            .into_iter()
            .filter(|r| r.status == ReplicaStatus::Active)
            .map(|r| r.node_id)
            .collect())
    }

    /// The port allocated for this deployment on a specific node.
    pub async fn get_replica_port(&self, deployment_id: &str, node_id: &str) -> Result<u16> {
        self.store
            .get_replica(deployment_id, node_id)
            .await?
            .map(|r| r.port)
            .ok_or_else(|| {
                Error::not_found(format!("no replica of {deployment_id} on {node_id}"))
            })
    }

    /// Update the status of one replica, preserving its other fields.
    pub async fn update_status(
        &self,
        deployment_id: &str,
        node_id: &str,
        status: ReplicaStatus,
    ) -> Result<()> {
        let mut replica = self
            .store
            .get_replica(deployment_id, node_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("no replica of {deployment_id} on {node_id}"))
            })?;
        replica.status = status;
        replica.updated_at = epoch_secs();
        self.store.upsert_replica(&replica).await
    }

    /// Remove every replica row for a deployment.
    pub async fn remove_all(&self, deployment_id: &str) -> Result<u32> {
        self.store.delete_replicas(deployment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orama_core::{ErrorKind, NodeRecord, NodeStatus};
    use orama_state::EmbeddedStore;

    async fn fixture(node_ids: &[&str]) -> ReplicaManager {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        let now = epoch_secs();
        for id in node_ids {
            store
                .upsert_node(&NodeRecord {
                    id: id.to_string(),
                    status: NodeStatus::Active,
                    ip_address: "10.0.0.1".to_string(),
                    last_seen: now,
                })
                .await
                .unwrap();
        }
        ReplicaManager::new(store as Arc<dyn StateStore>)
    }

    #[tokio::test]
    async fn selection_excludes_primary() {
        let manager = fixture(&["node-a", "node-b", "node-c"]).await;
        let picked = manager.select_replica_nodes("node-a", 2).await.unwrap();
        assert_eq!(picked.len(), 2);
        assert!(!picked.contains(&"node-a".to_string()));
    }

    #[tokio::test]
    async fn selection_returns_fewer_on_small_fleet() {
        let manager = fixture(&["node-a", "node-b"]).await;
        let picked = manager.select_replica_nodes("node-a", 3).await.unwrap();
        assert_eq!(picked, vec!["node-b".to_string()]);

        let single = fixture(&["node-a"]).await;
        assert!(single.select_replica_nodes("node-a", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn selection_is_deterministic_on_ties() {
        let manager = fixture(&["node-c", "node-a", "node-b"]).await;
        let picked = manager.select_replica_nodes("node-b", 2).await.unwrap();
        assert_eq!(picked, vec!["node-a".to_string(), "node-c".to_string()]);
    }

    #[tokio::test]
    async fn single_primary_is_enforced() {
        let manager = fixture(&["node-a", "node-b"]).await;

        manager.create_replica("d1", "node-a", 10100, true).await.unwrap();
        manager.create_replica("d1", "node-b", 10100, false).await.unwrap();

        let err = manager
            .create_replica("d1", "node-b", 10100, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // Re-upserting the same primary is fine.
        manager.create_replica("d1", "node-a", 10100, true).await.unwrap();

        let primaries = manager
            .get_replicas("d1")
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_primary)
            .count();
        assert_eq!(primaries, 1);
    }

    #[tokio::test]
    async fn status_transitions_and_active_listing() {
        let manager = fixture(&["node-a", "node-b"]).await;
        manager.create_replica("d1", "node-a", 10100, true).await.unwrap();
        manager.create_replica("d1", "node-b", 10105, false).await.unwrap();

        assert!(manager.active_replica_nodes("d1").await.unwrap().is_empty());

        manager
            .update_status("d1", "node-a", ReplicaStatus::Active)
            .await
            .unwrap();
        assert_eq!(
            manager.active_replica_nodes("d1").await.unwrap(),
            vec!["node-a".to_string()]
        );

        assert_eq!(manager.get_replica_port("d1", "node-b").await.unwrap(), 10105);

        let err = manager
            .update_status("d1", "node-x", ReplicaStatus::Failed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn remove_all_clears_rows() {
        let manager = fixture(&["node-a", "node-b"]).await;
        manager.create_replica("d1", "node-a", 10100, true).await.unwrap();
        manager.create_replica("d1", "node-b", 10100, false).await.unwrap();

        assert_eq!(manager.remove_all("d1").await.unwrap(), 2);
        assert!(manager.get_replicas("d1").await.unwrap().is_empty());
    }
}
