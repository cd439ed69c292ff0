//! Deployment registry over the shared state store.

use std::sync::Arc;

use tracing::{debug, info};

use orama_core::{
    Deployment, DeploymentStatus, Error, HistoryEntry, HistoryStatus, Result, epoch_secs,
};
use orama_state::StateStore;

/// Owns deployment records and their append-only version history.
#[derive(Clone)]
pub struct DeploymentRegistry {
    store: Arc<dyn StateStore>,
}

impl DeploymentRegistry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Persist a new deployment and its initial history row.
    ///
    /// Called by the orchestrator once the home node, port, and
    /// environment are fixed.
    pub async fn create(&self, deployment: &Deployment) -> Result<()> {
        self.store.insert_deployment(deployment).await?;
        self.store
            .append_history(&HistoryEntry {
                deployment_id: deployment.id.clone(),
                version: deployment.version,
                content_cid: deployment.content_cid.clone(),
                build_cid: deployment.build_cid.clone(),
                deployed_at: epoch_secs(),
                deployed_by: deployment.deployed_by.clone(),
                status: HistoryStatus::Deployed,
                rollback_from_version: None,
            })
            .await?;
        info!(
            id = %deployment.id,
            namespace = %deployment.namespace,
            name = %deployment.name,
            "deployment registered"
        );
        Ok(())
    }

    pub async fn get_by_name(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.store
            .get_deployment_by_name(namespace, name)
            .await?
            .ok_or_else(|| Error::not_found(format!("deployment {namespace}/{name} not found")))
    }

    /// Fetch by id, scoped to a namespace: an id from another tenant's
    /// namespace is indistinguishable from a missing one.
    pub async fn get_by_id(&self, namespace: &str, id: &str) -> Result<Deployment> {
        match self.store.get_deployment(id).await? {
            Some(d) if d.namespace == namespace => Ok(d),
            _ => Err(Error::not_found(format!(
                "deployment {id} not found in namespace {namespace}"
            ))),
        }
    }

    pub async fn list_namespace(&self, namespace: &str) -> Result<Vec<Deployment>> {
        self.store.list_deployments(namespace).await
    }

    /// Apply a status transition, rejecting anything outside the table:
    /// `deploying → {active, failed}`, `active → {updating, stopped}`,
    /// `updating → {active, failed}`. `stopped` is terminal.
    pub async fn set_status(&self, id: &str, status: DeploymentStatus) -> Result<()> {
        let mut deployment = self.require(id).await?;
        if !transition_allowed(deployment.status, status) {
            return Err(Error::conflict(format!(
                "deployment {id} cannot transition {:?} -> {:?}",
                deployment.status, status
            )));
        }
        debug!(%id, from = ?deployment.status, to = ?status, "status transition");
        deployment.status = status;
        deployment.updated_at = epoch_secs();
        self.store.update_deployment(&deployment).await
    }

    /// Advance a deployment to `version + 1` with new content, appending
    /// the matching history row. Returns the new version.
    pub async fn bump_version(
        &self,
        id: &str,
        content_cid: &str,
        build_cid: &str,
        deployed_by: &str,
        status: HistoryStatus,
        rollback_from_version: Option<u64>,
    ) -> Result<u64> {
        let mut deployment = self.require(id).await?;
        let new_version = deployment.version + 1;
        deployment.version = new_version;
        deployment.content_cid = content_cid.to_string();
        deployment.build_cid = build_cid.to_string();
        deployment.updated_at = epoch_secs();
        self.store.update_deployment(&deployment).await?;

        self.store
            .append_history(&HistoryEntry {
                deployment_id: id.to_string(),
                version: new_version,
                content_cid: content_cid.to_string(),
                build_cid: build_cid.to_string(),
                deployed_at: epoch_secs(),
                deployed_by: deployed_by.to_string(),
                status,
                rollback_from_version,
            })
            .await?;
        info!(%id, version = new_version, ?status, "version bumped");
        Ok(new_version)
    }

    /// The content ids recorded for one historical version.
    pub async fn get_history(&self, id: &str, version: u64) -> Result<HistoryEntry> {
        self.store.get_history(id, version).await?.ok_or_else(|| {
            Error::not_found(format!("deployment {id} has no history for version {version}"))
        })
    }

    pub async fn list_history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        self.store.list_history(id).await
    }

    /// Remove the deployment record and its history. Returns true if the
    /// record existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete_history(id).await?;
        self.store.delete_deployment(id).await
    }

    async fn require(&self, id: &str) -> Result<Deployment> {
        self.store
            .get_deployment(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("deployment {id} not found")))
    }
}

fn transition_allowed(from: DeploymentStatus, to: DeploymentStatus) -> bool {
    use DeploymentStatus::*;
    matches!(
        (from, to),
        (Deploying, Active)
            | (Deploying, Failed)
            | (Active, Updating)
            | (Active, Stopped)
            | (Updating, Active)
            | (Updating, Failed)
    )
}
