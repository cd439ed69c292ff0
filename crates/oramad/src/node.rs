//! Fleet membership maintenance.
//!
//! Each node periodically refreshes its own registry row and the cached
//! resource footprints of the namespaces it is home to. Peers read both
//! for capacity scoring; a node that stops beating disappears from
//! scheduling after the staleness window.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use orama_core::{DeploymentStatus, NodeRecord, NodeStatus, Result, epoch_secs};
use orama_state::StateStore;

/// Run the heartbeat loop until shutdown.
pub async fn run_heartbeat(
    store: Arc<dyn StateStore>,
    node_id: String,
    ip_address: String,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        if let Err(e) = beat(store.as_ref(), &node_id, &ip_address).await {
            warn!(node = %node_id, error = %e, "heartbeat failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                debug!(node = %node_id, "heartbeat loop stopped");
                return;
            }
        }
    }
}

/// One heartbeat: refresh this node's registry row and the footprints of
/// namespaces homed here.
pub async fn beat(store: &dyn StateStore, node_id: &str, ip_address: &str) -> Result<()> {
    let now = epoch_secs();
    store
        .upsert_node(&NodeRecord {
            id: node_id.to_string(),
            status: NodeStatus::Active,
            ip_address: ip_address.to_string(),
            last_seen: now,
        })
        .await?;

    for assignment in store.list_assignments().await? {
        if assignment.home_node_id != node_id {
            continue;
        }
        let deployments = store.list_deployments(&assignment.namespace).await?;
        let running: Vec<_> = deployments
            .iter()
            .filter(|d| d.status != DeploymentStatus::Stopped)
            .collect();

        let mut refreshed = assignment.clone();
        refreshed.deployment_count = running.len() as u32;
        refreshed.total_memory_mb = running
            .iter()
            .filter(|d| d.is_dynamic())
            .map(|d| u64::from(d.limits.memory_mb))
            .sum();
        refreshed.total_cpu_percent = running
            .iter()
            .filter(|d| d.is_dynamic())
            .map(|d| d.limits.cpu_pct)
            .sum();
        refreshed.last_heartbeat = now;
        store.update_assignment(&refreshed).await?;
    }

    debug!(node = %node_id, "heartbeat");
    Ok(())
}
