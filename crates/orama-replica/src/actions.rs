//! Local replica actions.
//!
//! One [`ReplicaHost`] per node implements what the replica RPC endpoints
//! do: the inbound HTTP handlers call it for requests from peers, and the
//! orchestrator calls it directly when the target node is the local one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use orama_core::{
    ContentStore, Deployment, DeploymentKind, DeploymentStatus, Error, NodeId, Replica,
    ReplicaStatus, Result, epoch_secs, paths,
};
use orama_placement::PortAllocator;
use orama_state::StateStore;
use orama_supervisor::Supervisor;

use crate::bundle;
use crate::protocol::{SetupRequest, SetupResponse, TeardownRequest, UpdateRequest};

/// Health wait for static bundles: extraction only.
pub const HEALTH_WAIT_STATIC: Duration = Duration::from_secs(60);

/// Health wait for dynamic deployments: process start plus dependency
/// installation.
pub const HEALTH_WAIT_DYNAMIC: Duration = Duration::from_secs(90);

/// Executes replica lifecycle operations on the local node.
pub struct ReplicaHost {
    node_id: NodeId,
    data_root: PathBuf,
    store: Arc<dyn StateStore>,
    content: Arc<dyn ContentStore>,
    supervisor: Arc<Supervisor>,
    ports: PortAllocator,
    health_wait_static: Duration,
    health_wait_dynamic: Duration,
}

impl ReplicaHost {
    pub fn new(
        node_id: impl Into<NodeId>,
        data_root: impl Into<PathBuf>,
        store: Arc<dyn StateStore>,
        content: Arc<dyn ContentStore>,
        supervisor: Arc<Supervisor>,
    ) -> Self {
        let ports = PortAllocator::new(store.clone());
        Self {
            node_id: node_id.into(),
            data_root: data_root.into(),
            store,
            content,
            supervisor,
            ports,
            health_wait_static: HEALTH_WAIT_STATIC,
            health_wait_dynamic: HEALTH_WAIT_DYNAMIC,
        }
    }

    /// Override the health-wait windows (tests).
    pub fn with_health_waits(mut self, static_wait: Duration, dynamic_wait: Duration) -> Self {
        self.health_wait_static = static_wait;
        self.health_wait_dynamic = dynamic_wait;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    fn workdir(&self, namespace: &str, name: &str) -> PathBuf {
        paths::deployment_dir(&self.data_root, namespace, name)
    }

    fn health_wait(&self, kind: DeploymentKind) -> Duration {
        if kind.is_dynamic() {
            self.health_wait_dynamic
        } else {
            self.health_wait_static
        }
    }

    /// Bring up a replica of a deployment on this node.
    pub async fn setup(
        &self,
        req: &SetupRequest,
        cancel: &CancellationToken,
    ) -> Result<SetupResponse> {
        // At most one allocation per deployment on a node: reuse the port
        // the orchestrator already reserved (recorded on the pre-created
        // replica row) before allocating a fresh one.
        let reserved = self
            .store
            .get_replica(&req.deployment_id, &self.node_id)
            .await?
            .map(|r| r.port)
            .filter(|port| *port != 0);
        let port = if !req.kind.is_dynamic() {
            0
        } else if let Some(port) = reserved {
            port
        } else {
            self.ports
                .allocate(&self.node_id, &req.deployment_id, cancel)
                .await?
        };

        let workdir = self.workdir(&req.namespace, &req.name);
        tokio::fs::create_dir_all(&workdir).await?;
        bundle::fetch_and_extract(
            self.content.as_ref(),
            effective_cid(&req.build_cid, &req.content_cid),
            &workdir,
        )
        .await?;

        let deployment = setup_view(req, &self.node_id, port);
        self.supervisor.start(&deployment, &workdir).await?;

        // A slow warm-up is logged, not fatal: the supervisor keeps the
        // process under its restart policy and the caller re-checks.
        if let Err(e) = self
            .supervisor
            .wait_healthy(&deployment, self.health_wait(req.kind), cancel)
            .await
        {
            warn!(
                deployment = %req.deployment_id,
                node = %self.node_id,
                error = %e,
                "replica not healthy within setup window"
            );
        }

        self.record_replica(&req.deployment_id, port, ReplicaStatus::Active)
            .await?;

        info!(
            deployment = %req.deployment_id,
            node = %self.node_id,
            port,
            "replica set up"
        );
        Ok(SetupResponse {
            port,
            node_id: self.node_id.clone(),
        })
    }

    /// Swap this node's replica to the requested content, rolling back
    /// to the previous version if the restarted process never gets
    /// healthy.
    pub async fn update(&self, req: &UpdateRequest, cancel: &CancellationToken) -> Result<()> {
        if !req.kind.is_dynamic() {
            // Static content is served from the blob store by cid; the
            // registry swap is the whole update.
            return Ok(());
        }

        let deployment = self
            .store
            .get_deployment(&req.deployment_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("deployment {} not found", req.deployment_id))
            })?;
        let port = match self
            .store
            .get_replica(&req.deployment_id, &self.node_id)
            .await?
        {
            Some(replica) => replica.port,
            None => deployment.port,
        };

        let mut next = deployment.clone();
        next.port = port;
        next.content_cid = req.content_cid.clone();
        next.build_cid = req.build_cid.clone();

        let workdir = self.workdir(&req.namespace, &req.name);
        bundle::stage_update(
            self.content.as_ref(),
            effective_cid(&req.build_cid, &req.content_cid),
            &workdir,
        )
        .await?;
        bundle::swap_in(&workdir).await?;

        match self.restart_and_wait(&next, &workdir, cancel).await {
            Ok(()) => {
                bundle::clear_transients(&workdir).await?;
                info!(
                    deployment = %req.deployment_id,
                    node = %self.node_id,
                    version = req.new_version,
                    "replica updated"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    deployment = %req.deployment_id,
                    node = %self.node_id,
                    error = %e,
                    "update failed, restoring previous version"
                );
                bundle::rollback_swap(&workdir).await?;
                let mut previous = deployment;
                previous.port = port;
                if let Err(restart_err) = self.supervisor.restart(&previous, &workdir).await {
                    warn!(
                        deployment = %req.deployment_id,
                        error = %restart_err,
                        "failed to restart previous version after rollback"
                    );
                }
                bundle::clear_transients(&workdir).await?;
                Err(e)
            }
        }
    }

    /// Roll this node's replica back to older content. Semantically
    /// identical to [`update`](Self::update) — the target cids come from
    /// history.
    pub async fn rollback(&self, req: &UpdateRequest, cancel: &CancellationToken) -> Result<()> {
        self.update(req, cancel).await
    }

    /// Stop and remove this node's replica.
    pub async fn teardown(&self, req: &TeardownRequest) -> Result<()> {
        let workdir = self.workdir(&req.namespace, &req.name);
        let deployment = teardown_view(req, &self.node_id);

        if let Err(e) = self.supervisor.stop(&deployment).await {
            warn!(deployment = %req.deployment_id, error = %e, "stop during teardown failed");
        }

        match tokio::fs::remove_dir_all(&workdir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        bundle::clear_transients(&workdir).await?;

        if let Some(mut replica) = self
            .store
            .get_replica(&req.deployment_id, &self.node_id)
            .await?
        {
            replica.status = ReplicaStatus::Removing;
            replica.updated_at = epoch_secs();
            self.store.upsert_replica(&replica).await?;
        }

        info!(deployment = %req.deployment_id, node = %self.node_id, "replica torn down");
        Ok(())
    }

    async fn restart_and_wait(
        &self,
        deployment: &Deployment,
        workdir: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.supervisor.restart(deployment, workdir).await?;
        self.supervisor
            .wait_healthy(deployment, self.health_wait_dynamic, cancel)
            .await
    }

    /// Record this node's replica row, preserving primaryship and
    /// creation time when the orchestrator pre-created it.
    async fn record_replica(
        &self,
        deployment_id: &str,
        port: u16,
        status: ReplicaStatus,
    ) -> Result<()> {
        let now = epoch_secs();
        let existing = self.store.get_replica(deployment_id, &self.node_id).await?;
        let (is_primary, created_at) = existing
            .map(|r| (r.is_primary, r.created_at))
            .unwrap_or((false, now));
        self.store
            .upsert_replica(&Replica {
                deployment_id: deployment_id.to_string(),
                node_id: self.node_id.clone(),
                port,
                status,
                is_primary,
                created_at,
                updated_at: now,
            })
            .await
    }
}

/// The built artifact is extracted when present; raw content otherwise.
fn effective_cid<'a>(build_cid: &'a str, content_cid: &'a str) -> &'a str {
    if build_cid.is_empty() {
        content_cid
    } else {
        build_cid
    }
}

fn setup_view(req: &SetupRequest, node_id: &str, port: u16) -> Deployment {
    let now = epoch_secs();
    Deployment {
        id: req.deployment_id.clone(),
        namespace: req.namespace.clone(),
        name: req.name.clone(),
        kind: req.kind,
        version: 1,
        status: DeploymentStatus::Deploying,
        content_cid: req.content_cid.clone(),
        build_cid: req.build_cid.clone(),
        home_node_id: node_id.to_string(),
        port,
        subdomain: None,
        environment: req.environment.clone(),
        limits: req.limits,
        health: req.health.clone(),
        created_at: now,
        updated_at: now,
        deployed_by: String::new(),
    }
}

fn teardown_view(req: &TeardownRequest, node_id: &str) -> Deployment {
    let now = epoch_secs();
    Deployment {
        id: req.deployment_id.clone(),
        namespace: req.namespace.clone(),
        name: req.name.clone(),
        kind: req.kind,
        version: 1,
        status: DeploymentStatus::Stopped,
        content_cid: String::new(),
        build_cid: String::new(),
        home_node_id: node_id.to_string(),
        port: 0,
        subdomain: None,
        environment: Default::default(),
        limits: Default::default(),
        health: Default::default(),
        created_at: now,
        updated_at: now,
        deployed_by: String::new(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for replica tests: an in-memory store, a
    //! filesystem content store, and a supervisor whose backend health is
    //! driven by a flag.

    use super::*;
    use async_trait::async_trait;
    use orama_core::{FsContentStore, HealthCheck, ResourceLimits};
    use orama_state::EmbeddedStore;
    use orama_supervisor::{
        LogStream, ServiceBackend, ServiceStatus, service::ServiceSpec,
    };
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    pub struct FlagBackend {
        pub healthy: Arc<AtomicBool>,
        pub restarts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ServiceBackend for FlagBackend {
        async fn start(&self, _spec: &ServiceSpec) -> Result<()> {
            Ok(())
        }
        async fn stop(&self, _service: &str) -> Result<()> {
            Ok(())
        }
        async fn restart(&self, _spec: &ServiceSpec) -> Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn status(&self, _service: &str) -> Result<ServiceStatus> {
            Ok(if self.healthy.load(Ordering::SeqCst) {
                ServiceStatus::Active
            } else {
                ServiceStatus::Inactive
            })
        }
        async fn logs(&self, _service: &str, _lines: u32, _follow: bool) -> Result<LogStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(LogStream::new(rx))
        }
        async fn pid(&self, _service: &str) -> Result<Option<u32>> {
            Ok(Some(4242))
        }
        async fn started_at(&self, _service: &str) -> Result<Option<u64>> {
            Ok(Some(epoch_secs()))
        }
    }

    pub struct Fixture {
        pub store: Arc<EmbeddedStore>,
        pub content: Arc<FsContentStore>,
        pub host: Arc<ReplicaHost>,
        pub healthy: Arc<AtomicBool>,
        pub restarts: Arc<AtomicU32>,
    }

    pub fn fixture(node_id: &str, data_root: &Path) -> Fixture {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        let content = Arc::new(FsContentStore::new(data_root.join("objects")));
        let healthy = Arc::new(AtomicBool::new(true));
        let restarts = Arc::new(AtomicU32::new(0));
        let supervisor = Arc::new(Supervisor::with_backend(
            Box::new(FlagBackend {
                healthy: healthy.clone(),
                restarts: restarts.clone(),
            }),
            data_root,
        ));
        let host = Arc::new(
            ReplicaHost::new(
                node_id,
                data_root,
                store.clone() as Arc<dyn StateStore>,
                content.clone() as Arc<dyn ContentStore>,
                supervisor,
            )
            .with_health_waits(Duration::ZERO, Duration::ZERO),
        );
        Fixture {
            store,
            content,
            host,
            healthy,
            restarts,
        }
    }

    pub fn setup_request(kind: DeploymentKind, content_cid: &str) -> SetupRequest {
        SetupRequest {
            deployment_id: "dep-1".to_string(),
            namespace: "ns1".to_string(),
            name: "app".to_string(),
            kind,
            content_cid: content_cid.to_string(),
            build_cid: String::new(),
            environment: HashMap::new(),
            health: HealthCheck::default(),
            limits: ResourceLimits::default(),
        }
    }

    pub fn update_request(kind: DeploymentKind, content_cid: &str) -> UpdateRequest {
        UpdateRequest {
            deployment_id: "dep-1".to_string(),
            namespace: "ns1".to_string(),
            name: "app".to_string(),
            kind,
            content_cid: content_cid.to_string(),
            build_cid: String::new(),
            new_version: 2,
        }
    }

    pub fn stored_deployment(kind: DeploymentKind, content_cid: &str) -> Deployment {
        let now = epoch_secs();
        Deployment {
            id: "dep-1".to_string(),
            namespace: "ns1".to_string(),
            name: "app".to_string(),
            kind,
            version: 1,
            status: DeploymentStatus::Active,
            content_cid: content_cid.to_string(),
            build_cid: String::new(),
            home_node_id: "node-a".to_string(),
            port: 10100,
            subdomain: None,
            environment: HashMap::new(),
            limits: ResourceLimits::default(),
            health: HealthCheck::default(),
            created_at: now,
            updated_at: now,
            deployed_by: "tester".to_string(),
        }
    }
}
