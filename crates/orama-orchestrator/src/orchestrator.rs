//! The end-to-end deployment driver.
//!
//! Turns a validated upload into an active, replicated deployment — or
//! fails cleanly. The orchestrator composes the placement managers, the
//! registry, and the replica host/client; when the target node is the
//! local one it calls the replica host directly, otherwise it goes
//! through the peer RPC.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use orama_core::{
    ContentStore, Deployment, DeploymentKind, DeploymentStatus, Error, HealthCheck,
    HistoryStatus, NodeId, ReplicaStatus, ResourceLimits, Result, epoch_secs,
};
use orama_placement::{HomeNodeManager, PortAllocator, ReplicaManager};
use orama_registry::DeploymentRegistry;
use orama_replica::{
    PeerClient, ReplicaHost, SetupRequest, TeardownRequest, UpdateRequest, bundle,
};
use orama_state::StateStore;

use crate::dns::DnsProvider;

/// A validated upload, as handed over by the gateway.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub namespace: String,
    pub name: String,
    pub kind: DeploymentKind,
    /// Gzipped tarball of the uploaded bundle.
    pub bundle: Vec<u8>,
    pub environment: HashMap<String, String>,
    pub limits: ResourceLimits,
    pub health: HealthCheck,
    pub subdomain: Option<String>,
    pub deployed_by: String,
}

/// Everything the orchestrator composes.
pub struct OrchestratorContext {
    pub node_id: NodeId,
    pub base_domain: String,
    /// Total replicas per deployment, primary included.
    pub replica_count: u32,
    pub data_root: PathBuf,
    pub store: Arc<dyn StateStore>,
    pub content: Arc<dyn ContentStore>,
    pub host: Arc<ReplicaHost>,
    pub peers: PeerClient,
    pub dns: Arc<dyn DnsProvider>,
}

/// Drives upload, update, rollback, and delete across the fleet.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    node_id: NodeId,
    base_domain: String,
    replica_count: u32,
    data_root: PathBuf,
    store: Arc<dyn StateStore>,
    content: Arc<dyn ContentStore>,
    registry: DeploymentRegistry,
    ports: PortAllocator,
    homes: HomeNodeManager,
    replicas: ReplicaManager,
    host: Arc<ReplicaHost>,
    peers: PeerClient,
    dns: Arc<dyn DnsProvider>,
}

/// Result of a replica fanout.
struct FanoutOutcome {
    healthy: u32,
    total: u32,
}

impl DeploymentOrchestrator {
    pub fn new(ctx: OrchestratorContext) -> Self {
        Self {
            node_id: ctx.node_id,
            base_domain: ctx.base_domain,
            replica_count: ctx.replica_count,
            data_root: ctx.data_root,
            registry: DeploymentRegistry::new(ctx.store.clone()),
            ports: PortAllocator::new(ctx.store.clone()),
            homes: HomeNodeManager::new(ctx.store.clone()),
            replicas: ReplicaManager::new(ctx.store.clone()),
            store: ctx.store,
            content: ctx.content,
            host: ctx.host,
            peers: ctx.peers,
            dns: ctx.dns,
        }
    }

    pub fn registry(&self) -> &DeploymentRegistry {
        &self.registry
    }

    pub fn home_nodes(&self) -> &HomeNodeManager {
        &self.homes
    }

    /// Public URLs for a deployment under this fleet's base domain.
    pub fn urls(&self, deployment: &Deployment) -> Vec<String> {
        deployment_urls(deployment, &self.base_domain)
    }

    // ── Create ─────────────────────────────────────────────────────

    pub async fn create(
        &self,
        req: NewDeployment,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        validate_slug("namespace", &req.namespace)?;
        validate_slug("name", &req.name)?;
        if self
            .store
            .get_deployment_by_name(&req.namespace, &req.name)
            .await?
            .is_some()
        {
            return Err(Error::already_exists(format!(
                "deployment {}/{} already exists",
                req.namespace, req.name
            )));
        }

        let home_node = self.homes.assign(&req.namespace).await?;
        let id = uuid::Uuid::new_v4().to_string();

        let port = if req.kind.is_dynamic() {
            self.ports.allocate(&home_node, &id, cancel).await?
        } else {
            0
        };

        let content_cid = self.persist_content(req.kind, &req.bundle).await?;

        let now = epoch_secs();
        let deployment = Deployment {
            id: id.clone(),
            namespace: req.namespace.clone(),
            name: req.name.clone(),
            kind: req.kind,
            version: 1,
            status: DeploymentStatus::Deploying,
            content_cid,
            build_cid: String::new(),
            home_node_id: home_node.clone(),
            port,
            subdomain: req.subdomain.clone(),
            environment: req.environment.clone(),
            limits: req.limits,
            health: req.health.clone(),
            created_at: now,
            updated_at: now,
            deployed_by: req.deployed_by.clone(),
        };
        self.registry.create(&deployment).await?;

        // Primary on the home node. A primary failure fails the whole
        // deployment; secondary failures below are best-effort.
        self.replicas
            .create_replica(&id, &home_node, port, true)
            .await?;
        let setup = setup_request(&deployment);
        if let Err(e) = self.dispatch_setup(&home_node, &setup, cancel).await {
            warn!(deployment = %id, node = %home_node, error = %e, "primary setup failed");
            let _ = self
                .replicas
                .update_status(&id, &home_node, ReplicaStatus::Failed)
                .await;
            let _ = self
                .registry
                .set_status(&id, DeploymentStatus::Failed)
                .await;
            return Err(e);
        }

        self.fanout_secondary_setup(&deployment, &setup, cancel).await?;

        self.registry.set_status(&id, DeploymentStatus::Active).await?;

        let created = self.registry.get_by_name(&req.namespace, &req.name).await?;
        info!(
            deployment = %id,
            namespace = %req.namespace,
            name = %req.name,
            home = %home_node,
            port,
            "deployment created"
        );

        // DNS record creation runs in the background; a failure is an
        // operator concern, not a deployment failure.
        let dns = self.dns.clone();
        let for_dns = created.clone();
        tokio::spawn(async move {
            if let Err(e) = dns.create_records(&for_dns).await {
                warn!(deployment = %for_dns.id, error = %e, "dns record creation failed");
            }
        });

        Ok(created)
    }

    /// Start secondaries in parallel sibling tasks. A failed secondary is
    /// logged and marked, never fatal.
    async fn fanout_secondary_setup(
        &self,
        deployment: &Deployment,
        setup: &SetupRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let secondaries = self
            .replicas
            .select_replica_nodes(&deployment.home_node_id, self.replica_count.saturating_sub(1))
            .await?;

        let mut tasks: JoinSet<(NodeId, Result<()>)> = JoinSet::new();
        for node in secondaries {
            self.replicas
                .create_replica(&deployment.id, &node, 0, false)
                .await?;
            let this = self.clone();
            let req = setup.clone();
            let token = cancel.child_token();
            tasks.spawn(async move {
                let result = this.dispatch_setup(&node, &req, &token).await.map(|_| ());
                (node, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((node, result)) = joined else { continue };
            if let Err(e) = result {
                warn!(
                    deployment = %deployment.id,
                    node = %node,
                    error = %e,
                    "secondary replica setup failed"
                );
                let _ = self
                    .replicas
                    .update_status(&deployment.id, &node, ReplicaStatus::Failed)
                    .await;
            }
        }
        Ok(())
    }

    // ── Update / rollback ──────────────────────────────────────────

    pub async fn update(
        &self,
        namespace: &str,
        name: &str,
        bundle: Vec<u8>,
        deployed_by: &str,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        let current = self.registry.get_by_name(namespace, name).await?;
        self.registry
            .set_status(&current.id, DeploymentStatus::Updating)
            .await?;

        let new_cid = match self.persist_content(current.kind, &bundle).await {
            Ok(cid) => cid,
            Err(e) => {
                let _ = self
                    .registry
                    .set_status(&current.id, DeploymentStatus::Active)
                    .await;
                return Err(e);
            }
        };

        self.apply_new_content(
            &current,
            &new_cid,
            "",
            deployed_by,
            HistoryStatus::Updated,
            None,
            cancel,
        )
        .await
    }

    /// Roll back to the content of `target_version`. Recorded as a
    /// forward history step: the version still increments.
    pub async fn rollback(
        &self,
        namespace: &str,
        name: &str,
        target_version: u64,
        deployed_by: &str,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        let current = self.registry.get_by_name(namespace, name).await?;
        let target = self.registry.get_history(&current.id, target_version).await?;
        self.registry
            .set_status(&current.id, DeploymentStatus::Updating)
            .await?;

        self.apply_new_content(
            &current,
            &target.content_cid,
            &target.build_cid,
            deployed_by,
            HistoryStatus::RolledBack,
            Some(current.version),
            cancel,
        )
        .await
    }

    /// Shared tail of update and rollback: fan the new content out to the
    /// replicas (for dynamic kinds), then commit or restore the registry.
    #[allow(clippy::too_many_arguments)]
    async fn apply_new_content(
        &self,
        current: &Deployment,
        content_cid: &str,
        build_cid: &str,
        deployed_by: &str,
        history_status: HistoryStatus,
        rollback_from: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        // For static kinds the registry swap is the whole operation:
        // ingress serves the new cid as soon as the record lands.
        if !current.is_dynamic() {
            self.registry
                .bump_version(
                    &current.id,
                    content_cid,
                    build_cid,
                    deployed_by,
                    history_status,
                    rollback_from,
                )
                .await?;
            self.registry
                .set_status(&current.id, DeploymentStatus::Active)
                .await?;
            return self.registry.get_by_name(&current.namespace, &current.name).await;
        }

        let rollback_call = history_status == HistoryStatus::RolledBack;
        let outcome = self
            .fanout_content_swap(current, content_cid, build_cid, rollback_call, cancel)
            .await?;

        if outcome.total > 0 && outcome.healthy * 2 >= outcome.total {
            self.registry
                .bump_version(
                    &current.id,
                    content_cid,
                    build_cid,
                    deployed_by,
                    history_status,
                    rollback_from,
                )
                .await?;
            self.registry
                .set_status(&current.id, DeploymentStatus::Active)
                .await?;
            info!(
                deployment = %current.id,
                healthy = outcome.healthy,
                total = outcome.total,
                "content swap committed"
            );
            self.registry.get_by_name(&current.namespace, &current.name).await
        } else {
            // Less than half the replicas took the new version; the
            // registry stays at the previous one. Nodes that failed have
            // already rolled themselves back.
            self.registry
                .set_status(&current.id, DeploymentStatus::Active)
                .await?;
            Err(Error::health_check(format!(
                "update of {}/{} failed: {} of {} replicas healthy",
                current.namespace, current.name, outcome.healthy, outcome.total
            )))
        }
    }

    /// Issue `replica/update` (or `replica/rollback`) to every active
    /// replica node in parallel. Per-node failures are recorded, not
    /// propagated — divergence is visible via replica status.
    async fn fanout_content_swap(
        &self,
        deployment: &Deployment,
        content_cid: &str,
        build_cid: &str,
        rollback_call: bool,
        cancel: &CancellationToken,
    ) -> Result<FanoutOutcome> {
        let mut targets = self.replicas.active_replica_nodes(&deployment.id).await?;
        if targets.is_empty() {
            targets.push(deployment.home_node_id.clone());
        }

        let req = UpdateRequest {
            deployment_id: deployment.id.clone(),
            namespace: deployment.namespace.clone(),
            name: deployment.name.clone(),
            kind: deployment.kind,
            content_cid: content_cid.to_string(),
            build_cid: build_cid.to_string(),
            new_version: deployment.version + 1,
        };

        let total = targets.len() as u32;
        let mut tasks: JoinSet<(NodeId, Result<()>)> = JoinSet::new();
        for node in targets {
            let this = self.clone();
            let req = req.clone();
            let token = cancel.child_token();
            tasks.spawn(async move {
                let result = this.dispatch_content_swap(&node, &req, rollback_call, &token).await;
                (node, result)
            });
        }

        let mut healthy = 0;
        while let Some(joined) = tasks.join_next().await {
            let Ok((node, result)) = joined else { continue };
            match result {
                Ok(()) => healthy += 1,
                Err(e) => {
                    warn!(
                        deployment = %deployment.id,
                        node = %node,
                        error = %e,
                        "replica content swap failed"
                    );
                    let _ = self
                        .replicas
                        .update_status(&deployment.id, &node, ReplicaStatus::Failed)
                        .await;
                }
            }
        }
        Ok(FanoutOutcome { healthy, total })
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Tear the deployment down everywhere and cascade-delete its state:
    /// ports, replicas, DNS, history, and finally the record itself.
    pub async fn delete(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deployment = self.registry.get_by_name(namespace, name).await?;

        let mut nodes: Vec<NodeId> = self
            .replicas
            .get_replicas(&deployment.id)
            .await?
            .into_iter()
            .map(|r| r.node_id)
            .collect();
        if !nodes.contains(&deployment.home_node_id) {
            nodes.push(deployment.home_node_id.clone());
        }

        let req = TeardownRequest {
            deployment_id: deployment.id.clone(),
            namespace: deployment.namespace.clone(),
            name: deployment.name.clone(),
            kind: deployment.kind,
        };

        let mut tasks: JoinSet<(NodeId, Result<()>)> = JoinSet::new();
        for node in nodes {
            let this = self.clone();
            let req = req.clone();
            let token = cancel.child_token();
            tasks.spawn(async move {
                let result = this.dispatch_teardown(&node, &req, &token).await;
                (node, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let Ok((node, result)) = joined else { continue };
            if let Err(e) = result {
                warn!(deployment = %deployment.id, node = %node, error = %e, "teardown failed");
            }
        }

        if let Err(e) = self.content.unpin(&deployment.content_cid).await {
            warn!(deployment = %deployment.id, error = %e, "failed to unpin content");
        }
        if !deployment.build_cid.is_empty() {
            if let Err(e) = self.content.unpin(&deployment.build_cid).await {
                warn!(deployment = %deployment.id, error = %e, "failed to unpin build artifact");
            }
        }

        self.ports.deallocate(&deployment.id).await?;
        self.replicas.remove_all(&deployment.id).await?;
        if let Err(e) = self.dns.delete_records(&deployment).await {
            warn!(deployment = %deployment.id, error = %e, "dns record deletion failed");
        }
        self.registry.delete(&deployment.id).await?;

        info!(deployment = %deployment.id, namespace, name, "deployment deleted");
        Ok(())
    }

    // ── Dispatch ───────────────────────────────────────────────────

    async fn dispatch_setup(
        &self,
        node: &str,
        req: &SetupRequest,
        cancel: &CancellationToken,
    ) -> Result<u16> {
        if node == self.node_id {
            Ok(self.host.setup(req, cancel).await?.port)
        } else {
            let ip = self.peer_ip(node).await?;
            Ok(self.peers.setup(&ip, req, cancel).await?.port)
        }
    }

    async fn dispatch_content_swap(
        &self,
        node: &str,
        req: &UpdateRequest,
        rollback_call: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if node == self.node_id {
            if rollback_call {
                self.host.rollback(req, cancel).await
            } else {
                self.host.update(req, cancel).await
            }
        } else {
            let ip = self.peer_ip(node).await?;
            if rollback_call {
                self.peers.rollback(&ip, req, cancel).await.map(|_| ())
            } else {
                self.peers.update(&ip, req, cancel).await.map(|_| ())
            }
        }
    }

    async fn dispatch_teardown(
        &self,
        node: &str,
        req: &TeardownRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if node == self.node_id {
            self.host.teardown(req).await
        } else {
            let ip = self.peer_ip(node).await?;
            self.peers.teardown(&ip, req, cancel).await.map(|_| ())
        }
    }

    async fn peer_ip(&self, node: &str) -> Result<String> {
        self.store
            .get_node(node)
            .await?
            .map(|n| n.ip_address)
            .ok_or_else(|| Error::not_found(format!("node {node} is not in the registry")))
    }

    // ── Content intake ─────────────────────────────────────────────

    /// Persist an uploaded bundle. Dynamic kinds store the tarball as-is;
    /// static kinds are extracted and re-added as a directory blob so the
    /// ingress can serve individual files by cid.
    async fn persist_content(&self, kind: DeploymentKind, data: &[u8]) -> Result<String> {
        if kind.is_dynamic() {
            return self.content.add(data).await;
        }
        let scratch_root = self.data_root.join("tmp");
        tokio::fs::create_dir_all(&scratch_root).await?;
        let scratch = tempfile::tempdir_in(&scratch_root)
            .map_err(|e| Error::internal(format!("failed to create scratch dir: {e}")))?;
        bundle::extract_archive(data.to_vec(), scratch.path().to_path_buf()).await?;
        self.content.add_directory(scratch.path()).await
    }
}

fn setup_request(deployment: &Deployment) -> SetupRequest {
    SetupRequest {
        deployment_id: deployment.id.clone(),
        namespace: deployment.namespace.clone(),
        name: deployment.name.clone(),
        kind: deployment.kind,
        content_cid: deployment.content_cid.clone(),
        build_cid: deployment.build_cid.clone(),
        environment: deployment.environment.clone(),
        health: deployment.health.clone(),
        limits: deployment.limits,
    }
}

/// URL set for a deployment: the node-scoped URL always, the custom
/// subdomain URL when one is set.
pub fn deployment_urls(deployment: &Deployment, base_domain: &str) -> Vec<String> {
    let mut urls = vec![format!(
        "https://{}.{}.{}",
        deployment.name, deployment.home_node_id, base_domain
    )];
    if let Some(subdomain) = &deployment.subdomain {
        urls.push(format!("https://{subdomain}.{base_domain}"));
    }
    urls
}

/// DNS-label-ish validation for namespaces and deployment names.
fn validate_slug(field: &str, value: &str) -> Result<()> {
    let chars_ok = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let ends_ok = value.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if value.is_empty() || value.len() > 63 || !chars_ok || !ends_ok {
        return Err(Error::validation(format!(
            "{field} must be 1-63 lowercase alphanumeric, '-' or '.' characters: {value:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::NoopDns;
    use async_trait::async_trait;
    use orama_core::{ErrorKind, FsContentStore, NodeRecord, NodeStatus};
    use orama_core::paths;
    use orama_replica::bundle::archive_from_files;
    use orama_state::EmbeddedStore;
    use orama_supervisor::{
        LogStream, ServiceBackend, ServiceStatus, Supervisor, service::ServiceSpec,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FlagBackend {
        healthy: Arc<AtomicBool>,
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

    struct Fixture {
        store: Arc<EmbeddedStore>,
        orchestrator: DeploymentOrchestrator,
        healthy: Arc<AtomicBool>,
    }

    async fn fixture(node_id: &str, data_root: &Path) -> Fixture {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        store
            .upsert_node(&NodeRecord {
                id: node_id.to_string(),
                status: NodeStatus::Active,
                ip_address: "127.0.0.1".to_string(),
                last_seen: epoch_secs(),
            })
            .await
            .unwrap();

        let content = Arc::new(FsContentStore::new(data_root.join("objects")));
        let healthy = Arc::new(AtomicBool::new(true));
        let supervisor = Arc::new(Supervisor::with_backend(
            Box::new(FlagBackend {
                healthy: healthy.clone(),
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

        let orchestrator = DeploymentOrchestrator::new(OrchestratorContext {
            node_id: node_id.to_string(),
            base_domain: "orama.host".to_string(),
            replica_count: 2,
            data_root: data_root.to_path_buf(),
            store: store.clone() as Arc<dyn StateStore>,
            content,
            host,
            peers: PeerClient::new("replica-coordination", 9440).unwrap(),
            dns: Arc::new(NoopDns),
        });

        Fixture {
            store,
            orchestrator,
            healthy,
        }
    }

    fn static_upload(namespace: &str, name: &str, marker: &str) -> NewDeployment {
        NewDeployment {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: DeploymentKind::Static,
            bundle: archive_from_files(&[("index.html", marker)]).unwrap(),
            environment: HashMap::new(),
            limits: ResourceLimits::default(),
            health: HealthCheck::default(),
            subdomain: None,
            deployed_by: "tester".to_string(),
        }
    }

    fn dynamic_upload(namespace: &str, name: &str, marker: &str) -> NewDeployment {
        NewDeployment {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: DeploymentKind::NodeBackend,
            bundle: archive_from_files(&[("index.js", marker)]).unwrap(),
            environment: HashMap::new(),
            limits: ResourceLimits::default(),
            health: HealthCheck::default(),
            subdomain: None,
            deployed_by: "tester".to_string(),
        }
    }

    #[tokio::test]
    async fn first_static_deployment_on_a_one_node_fleet() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        let deployment = fx
            .orchestrator
            .create(static_upload("ns1", "hello", "<h1>hi</h1>"), &cancel)
            .await
            .unwrap();

        // Home assignment, record shape, history, and URL per the
        // single-node bring-up contract.
        let assignment = fx.store.get_assignment("ns1").await.unwrap().unwrap();
        assert_eq!(assignment.home_node_id, "node-a");

        assert_eq!(deployment.status, DeploymentStatus::Active);
        assert_eq!(deployment.version, 1);
        assert_eq!(deployment.port, 0);
        assert_eq!(deployment.home_node_id, "node-a");

        let history = fx.orchestrator.registry().list_history(&deployment.id).await.unwrap();
        assert_eq!(history.len(), 1);

        assert_eq!(
            fx.orchestrator.urls(&deployment),
            vec!["https://hello.node-a.orama.host".to_string()]
        );

        // The content is extracted on the home node.
        let workdir = paths::deployment_dir(dir.path(), "ns1", "hello");
        assert_eq!(
            std::fs::read_to_string(workdir.join("index.html")).unwrap(),
            "<h1>hi</h1>"
        );
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_before_any_state() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        for bad in ["", "Has-Caps", "-leading", "trailing-", "sp ace"] {
            let err = fx
                .orchestrator
                .create(static_upload("ns1", bad, "x"), &cancel)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "name {bad:?}");
        }
        assert!(fx.store.get_assignment("ns1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        fx.orchestrator
            .create(static_upload("ns1", "site", "v1"), &cancel)
            .await
            .unwrap();
        let err = fx
            .orchestrator
            .create(static_upload("ns1", "site", "v2"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn dynamic_create_allocates_home_port() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        let deployment = fx
            .orchestrator
            .create(dynamic_upload("ns1", "api", "srv"), &cancel)
            .await
            .unwrap();

        assert_eq!(deployment.port, 10100);
        assert_eq!(fx.store.list_ports("node-a").await.unwrap(), vec![10100]);

        let replicas = fx.store.list_replicas(&deployment.id).await.unwrap();
        assert_eq!(replicas.len(), 1);
        assert!(replicas[0].is_primary);
        assert_eq!(replicas[0].status, ReplicaStatus::Active);
    }

    #[tokio::test]
    async fn static_update_is_a_registry_swap() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        let v1 = fx
            .orchestrator
            .create(static_upload("ns1", "site", "v1"), &cancel)
            .await
            .unwrap();

        let updated = fx
            .orchestrator
            .update(
                "ns1",
                "site",
                archive_from_files(&[("index.html", "v2")]).unwrap(),
                "tester",
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_ne!(updated.content_cid, v1.content_cid);
        assert_eq!(updated.status, DeploymentStatus::Active);
    }

    #[tokio::test]
    async fn dynamic_update_commits_when_replicas_stay_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        fx.orchestrator
            .create(dynamic_upload("ns1", "api", "v1"), &cancel)
            .await
            .unwrap();

        let updated = fx
            .orchestrator
            .update(
                "ns1",
                "api",
                archive_from_files(&[("index.js", "v2")]).unwrap(),
                "tester",
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(updated.version, 2);
        let workdir = paths::deployment_dir(dir.path(), "ns1", "api");
        assert_eq!(
            std::fs::read_to_string(workdir.join("index.js")).unwrap(),
            "v2"
        );
    }

    #[tokio::test]
    async fn failed_update_leaves_previous_version_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        let created = fx
            .orchestrator
            .create(dynamic_upload("ns1", "api", "v1"), &cancel)
            .await
            .unwrap();

        // The restarted process never becomes healthy.
        fx.healthy.store(false, Ordering::SeqCst);

        let err = fx
            .orchestrator
            .update(
                "ns1",
                "api",
                archive_from_files(&[("index.js", "v2")]).unwrap(),
                "tester",
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HealthCheck);

        // Registry unchanged, old bundle rename-restored, no staging or
        // backup directories remain.
        let current = fx.orchestrator.registry().get_by_name("ns1", "api").await.unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.content_cid, created.content_cid);
        assert_eq!(current.status, DeploymentStatus::Active);

        let workdir = paths::deployment_dir(dir.path(), "ns1", "api");
        assert_eq!(
            std::fs::read_to_string(workdir.join("index.js")).unwrap(),
            "v1"
        );
        assert!(!paths::staging_dir(&workdir).exists());
        assert!(!paths::backup_dir(&workdir).exists());

        assert_eq!(
            fx.orchestrator.registry().list_history(&current.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn rollback_is_a_forward_history_step() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        let v1 = fx
            .orchestrator
            .create(static_upload("ns1", "site", "v1"), &cancel)
            .await
            .unwrap();
        fx.orchestrator
            .update(
                "ns1",
                "site",
                archive_from_files(&[("index.html", "v2")]).unwrap(),
                "tester",
                &cancel,
            )
            .await
            .unwrap();

        let rolled = fx
            .orchestrator
            .rollback("ns1", "site", 1, "operator", &cancel)
            .await
            .unwrap();

        assert_eq!(rolled.version, 3);
        assert_eq!(rolled.content_cid, v1.content_cid);

        let entry = fx.orchestrator.registry().get_history(&rolled.id, 3).await.unwrap();
        assert_eq!(entry.status, HistoryStatus::RolledBack);
        assert_eq!(entry.rollback_from_version, Some(2));

        let versions: Vec<u64> = fx
            .orchestrator
            .registry()
            .list_history(&rolled.id)
            .await
            .unwrap()
            .iter()
            .map(|h| h.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn delete_cascades_and_frees_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        let deployment = fx
            .orchestrator
            .create(dynamic_upload("ns1", "api", "v1"), &cancel)
            .await
            .unwrap();

        fx.orchestrator.delete("ns1", "api", &cancel).await.unwrap();

        assert!(fx.store.get_deployment(&deployment.id).await.unwrap().is_none());
        assert!(fx.store.list_replicas(&deployment.id).await.unwrap().is_empty());
        assert!(fx.store.list_ports("node-a").await.unwrap().is_empty());
        assert!(fx.store.list_history(&deployment.id).await.unwrap().is_empty());
        assert!(!paths::deployment_dir(dir.path(), "ns1", "api").exists());

        // The name is immediately reusable.
        fx.orchestrator
            .create(dynamic_upload("ns1", "api", "again"), &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subdomain_adds_second_url() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture("node-a", dir.path()).await;
        let cancel = CancellationToken::new();

        let mut upload = static_upload("ns1", "site", "x");
        upload.subdomain = Some("www".to_string());
        let deployment = fx.orchestrator.create(upload, &cancel).await.unwrap();

        assert_eq!(
            fx.orchestrator.urls(&deployment),
            vec![
                "https://site.node-a.orama.host".to_string(),
                "https://www.orama.host".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn create_with_no_fleet_is_a_typed_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A store with no node records at all.
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        let content = Arc::new(FsContentStore::new(dir.path().join("objects")));
        let healthy = Arc::new(AtomicBool::new(true));
        let supervisor = Arc::new(Supervisor::with_backend(
            Box::new(FlagBackend { healthy }),
            dir.path(),
        ));
        let host = Arc::new(ReplicaHost::new(
            "node-a",
            dir.path(),
            store.clone() as Arc<dyn StateStore>,
            content.clone() as Arc<dyn ContentStore>,
            supervisor,
        ));
        let orchestrator = DeploymentOrchestrator::new(OrchestratorContext {
            node_id: "node-a".to_string(),
            base_domain: "orama.host".to_string(),
            replica_count: 2,
            data_root: dir.path().to_path_buf(),
            store: store as Arc<dyn StateStore>,
            content,
            host,
            peers: PeerClient::new("replica-coordination", 9440).unwrap(),
            dns: Arc::new(NoopDns),
        });

        let err = orchestrator
            .create(static_upload("ns1", "site", "x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoNodesAvailable);
    }
}
