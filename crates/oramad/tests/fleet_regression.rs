//! Fleet behavior over a shared state store.
//!
//! Two logical nodes share one store (as the replicated SQL cluster
//! would); each gets its own supervisor, content root, and replica host.
//! Validates home migration after node death and the best-effort replica
//! fanout.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use orama_core::{
    ContentStore, DeploymentKind, DeploymentStatus, FsContentStore, HealthCheck, NodeRecord,
    NodeStatus, ReplicaStatus, ResourceLimits, Result, epoch_secs,
};
use orama_orchestrator::{
    DeploymentOrchestrator, NewDeployment, NoopDns, OrchestratorContext,
};
use orama_replica::bundle::archive_from_files;
use orama_replica::{PeerClient, ReplicaHost};
use orama_state::{EmbeddedStore, StateStore};
use orama_supervisor::service::ServiceSpec;
use orama_supervisor::{LogStream, ServiceBackend, ServiceStatus, Supervisor};

struct AlwaysActive;

#[async_trait]
impl ServiceBackend for AlwaysActive {
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
        Ok(ServiceStatus::Active)
    }
    async fn logs(&self, _service: &str, _lines: u32, _follow: bool) -> Result<LogStream> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(LogStream::new(rx))
    }
    async fn pid(&self, _service: &str) -> Result<Option<u32>> {
        Ok(None)
    }
    async fn started_at(&self, _service: &str) -> Result<Option<u64>> {
        Ok(None)
    }
}

fn orchestrator_on(
    node_id: &str,
    data_root: &Path,
    store: Arc<EmbeddedStore>,
    replica_count: u32,
) -> DeploymentOrchestrator {
    let content: Arc<dyn ContentStore> =
        Arc::new(FsContentStore::new(data_root.join("shared-objects")));
    let supervisor = Arc::new(Supervisor::with_backend(
        Box::new(AlwaysActive),
        data_root.join(node_id),
    ));
    let host = Arc::new(ReplicaHost::new(
        node_id,
        data_root.join(node_id),
        store.clone() as Arc<dyn StateStore>,
        content.clone(),
        supervisor,
    ));
    DeploymentOrchestrator::new(OrchestratorContext {
        node_id: node_id.to_string(),
        base_domain: "orama.host".to_string(),
        replica_count,
        data_root: data_root.join(node_id),
        store: store as Arc<dyn StateStore>,
        content,
        host,
        // Points at a port nothing listens on: peer calls fail fast.
        peers: PeerClient::new("replica-coordination", 59440).unwrap(),
        dns: Arc::new(NoopDns),
    })
}

async fn register_node(store: &EmbeddedStore, node_id: &str, last_seen: u64) {
    store
        .upsert_node(&NodeRecord {
            id: node_id.to_string(),
            status: NodeStatus::Active,
            ip_address: "127.0.0.1".to_string(),
            last_seen,
        })
        .await
        .unwrap();
}

fn dynamic_upload(namespace: &str, name: &str) -> NewDeployment {
    NewDeployment {
        namespace: namespace.to_string(),
        name: name.to_string(),
        kind: DeploymentKind::NodeBackend,
        bundle: archive_from_files(&[("index.js", "server")]).unwrap(),
        environment: HashMap::new(),
        limits: ResourceLimits::default(),
        health: HealthCheck::default(),
        subdomain: None,
        deployed_by: "tester".to_string(),
    }
}

#[tokio::test]
async fn migration_moves_subsequent_port_allocations() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
    let cancel = CancellationToken::new();

    // node-a is alone and becomes home for ns1.
    register_node(&store, "node-a", epoch_secs()).await;
    let on_a = orchestrator_on("node-a", dir.path(), store.clone(), 1);
    let first = on_a.create(dynamic_upload("ns1", "api"), &cancel).await.unwrap();
    assert_eq!(first.home_node_id, "node-a");
    assert_eq!(store.list_ports("node-a").await.unwrap(), vec![10100]);

    // node-a dies (no heartbeat past the staleness window); node-b joins.
    register_node(&store, "node-a", epoch_secs() - 300).await;
    register_node(&store, "node-b", epoch_secs()).await;

    let on_b = orchestrator_on("node-b", dir.path(), store.clone(), 1);
    on_b.home_nodes().migrate("ns1", "node-b").await.unwrap();

    let assignment = store.get_assignment("ns1").await.unwrap().unwrap();
    assert_eq!(assignment.home_node_id, "node-b");

    // New deployments in ns1 now land on node-b and allocate its ports.
    let second = on_b.create(dynamic_upload("ns1", "worker"), &cancel).await.unwrap();
    assert_eq!(second.home_node_id, "node-b");
    assert_eq!(second.port, 10100);
    assert_eq!(store.list_ports("node-b").await.unwrap(), vec![10100]);
}

#[tokio::test]
async fn unreachable_secondary_does_not_fail_the_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
    let cancel = CancellationToken::new();

    let now = epoch_secs();
    register_node(&store, "node-a", now).await;
    register_node(&store, "node-b", now).await;

    // replica_count 2: the orchestrator on node-a will try to set up a
    // secondary on node-b over HTTP, which refuses the connection.
    let on_a = orchestrator_on("node-a", dir.path(), store.clone(), 2);
    let deployment = on_a.create(dynamic_upload("ns1", "api"), &cancel).await.unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Active);

    let replicas = store.list_replicas(&deployment.id).await.unwrap();
    assert_eq!(replicas.len(), 2);

    let primary = replicas.iter().find(|r| r.node_id == "node-a").unwrap();
    assert!(primary.is_primary);
    assert_eq!(primary.status, ReplicaStatus::Active);

    let secondary = replicas.iter().find(|r| r.node_id == "node-b").unwrap();
    assert!(!secondary.is_primary);
    assert_eq!(secondary.status, ReplicaStatus::Failed);
}

#[tokio::test]
async fn two_namespaces_spread_across_the_fleet() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
    let cancel = CancellationToken::new();

    let now = epoch_secs();
    register_node(&store, "node-a", now).await;
    register_node(&store, "node-b", now).await;

    // First namespace ties; lexicographic tie-break picks node-a.
    let on_a = orchestrator_on("node-a", dir.path(), store.clone(), 1);
    let first = on_a.create(dynamic_upload("alpha", "api"), &cancel).await.unwrap();
    assert_eq!(first.home_node_id, "node-a");

    // With node-a's footprint cached, the next namespace prefers node-b.
    on_a.home_nodes()
        .update_resource_usage("alpha", 1, 512, 100)
        .await
        .unwrap();
    let on_b = orchestrator_on("node-b", dir.path(), store.clone(), 1);
    let second = on_b.create(dynamic_upload("beta", "api"), &cancel).await.unwrap();
    assert_eq!(second.home_node_id, "node-b");
}
