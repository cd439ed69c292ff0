//! Namespace → home node assignment.
//!
//! Each namespace is pinned to exactly one home node, chosen by capacity
//! score on first deployment. Assignment is linearized by the store's
//! unique constraint on the namespace: the losing writer of a race
//! re-reads and returns the winner's choice, so `assign` is idempotent
//! across the fleet.

use std::sync::Arc;

use tracing::{debug, info};

use orama_core::{Error, ErrorKind, HomeNodeAssignment, NodeId, Result, epoch_secs};
use orama_state::StateStore;

use crate::score::{ScoringWeights, rank_nodes, schedulable_usages};

/// Assigns namespaces to home nodes and maintains their cached footprints.
#[derive(Clone)]
pub struct HomeNodeManager {
    store: Arc<dyn StateStore>,
    weights: ScoringWeights,
}

impl HomeNodeManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            weights: ScoringWeights::default(),
        }
    }

    /// Assign a home node for `namespace`, or return the existing one.
    pub async fn assign(&self, namespace: &str) -> Result<NodeId> {
        if let Some(existing) = self.store.get_assignment(namespace).await? {
            return Ok(existing.home_node_id);
        }

        let usages = schedulable_usages(self.store.as_ref()).await?;
        if usages.is_empty() {
            return Err(Error::no_nodes_available(
                "no active nodes available for home assignment",
            ));
        }

        let ranked = rank_nodes(&usages, &self.weights);
        let best = &ranked[0];
        debug!(
            namespace,
            node = %best.node_id,
            score = best.score,
            candidates = ranked.len(),
            "picked home node"
        );

        let now = epoch_secs();
        let assignment = HomeNodeAssignment {
            namespace: namespace.to_string(),
            home_node_id: best.node_id.clone(),
            assigned_at: now,
            last_heartbeat: now,
            deployment_count: 0,
            total_memory_mb: 0,
            total_cpu_percent: 0,
        };

        match self.store.insert_assignment(&assignment).await {
            Ok(()) => {
                info!(namespace, node = %best.node_id, "namespace assigned to home node");
                Ok(assignment.home_node_id)
            }
            Err(e) if e.is(ErrorKind::AlreadyExists) => {
                // A peer won the race; their choice stands.
                let winner = self.store.get_assignment(namespace).await?.ok_or_else(|| {
                    Error::internal(format!(
                        "assignment for {namespace} vanished after conflicting insert"
                    ))
                })?;
                Ok(winner.home_node_id)
            }
            Err(e) => Err(e),
        }
    }

    /// The home node for a namespace.
    pub async fn get(&self, namespace: &str) -> Result<NodeId> {
        self.store
            .get_assignment(namespace)
            .await?
            .map(|a| a.home_node_id)
            .ok_or_else(|| {
                Error::namespace_not_assigned(format!("namespace {namespace} has no home node"))
            })
    }

    /// Refresh the assignment heartbeat.
    pub async fn heartbeat(&self, namespace: &str) -> Result<()> {
        let mut assignment = self.require(namespace).await?;
        assignment.last_heartbeat = epoch_secs();
        self.store.update_assignment(&assignment).await
    }

    /// Overwrite the cached resource footprint for a namespace.
    pub async fn update_resource_usage(
        &self,
        namespace: &str,
        deployment_count: u32,
        total_memory_mb: u64,
        total_cpu_percent: u32,
    ) -> Result<()> {
        let mut assignment = self.require(namespace).await?;
        assignment.deployment_count = deployment_count;
        assignment.total_memory_mb = total_memory_mb;
        assignment.total_cpu_percent = total_cpu_percent;
        self.store.update_assignment(&assignment).await
    }

    /// Namespaces whose assignment heartbeat is older than `threshold_s`.
    pub async fn stale_namespaces(&self, threshold_s: u64) -> Result<Vec<String>> {
        let now = epoch_secs();
        let assignments = self.store.list_assignments().await?;
        Ok(assignments
            .into_iter()
            .filter(|a| now.saturating_sub(a.last_heartbeat) > threshold_s)
            .map(|a| a.namespace)
            .collect())
    }

    /// Atomically reassign a namespace to a new home node. Used by the
    /// operator when the previous home node dies.
    pub async fn migrate(&self, namespace: &str, new_node: &str) -> Result<()> {
        let mut assignment = self.require(namespace).await?;
        let old = std::mem::replace(&mut assignment.home_node_id, new_node.to_string());
        assignment.assigned_at = epoch_secs();
        self.store.update_assignment(&assignment).await?;
        info!(namespace, from = %old, to = %new_node, "namespace migrated");
        Ok(())
    }

    async fn require(&self, namespace: &str) -> Result<HomeNodeAssignment> {
        self.store.get_assignment(namespace).await?.ok_or_else(|| {
            Error::namespace_not_assigned(format!("namespace {namespace} has no home node"))
        })
    }
}
