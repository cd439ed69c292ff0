//! Operator-facing status API.
//!
//! Read side of the registry plus computed URLs and live process stats.
//! Deletion goes through the orchestrator so the full cascade runs. The
//! tenant upload path (multipart, auth) lives in the gateway, not here.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use orama_core::Deployment;
use orama_orchestrator::DeploymentOrchestrator;
use orama_replica::routes::error_response;
use orama_supervisor::Supervisor;

/// Shared state for the status API.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: DeploymentOrchestrator,
    pub supervisor: Arc<Supervisor>,
    /// Node-wide shutdown token; each mutating request gets a child.
    pub shutdown: CancellationToken,
}

/// Build the status API router.
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/deployments/{namespace}", get(list_deployments))
        .route(
            "/deployments/{namespace}/{name}",
            get(get_deployment).delete(delete_deployment),
        )
        .route("/deployments/{namespace}/{name}/stats", get(get_stats))
        .route("/deployments/{namespace}/{name}/logs", get(get_logs))
        .with_state(state)
}

/// A registry record plus its public URLs.
#[derive(Serialize)]
struct DeploymentDetail {
    #[serde(flatten)]
    deployment: Deployment,
    urls: Vec<String>,
}

async fn list_deployments(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
) -> Response {
    match state.orchestrator.registry().list_namespace(&namespace).await {
        Ok(deployments) => {
            let details: Vec<DeploymentDetail> = deployments
                .into_iter()
                .map(|d| DeploymentDetail {
                    urls: state.orchestrator.urls(&d),
                    deployment: d,
                })
                .collect();
            Json(details).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn get_deployment(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state.orchestrator.registry().get_by_name(&namespace, &name).await {
        Ok(deployment) => Json(DeploymentDetail {
            urls: state.orchestrator.urls(&deployment),
            deployment,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn delete_deployment(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state
        .orchestrator
        .delete(&namespace, &name, &state.shutdown.child_token())
        .await
    {
        Ok(()) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Stats shape differs by kind: dynamic deployments report the process,
/// static ones only disk.
#[derive(Serialize)]
#[serde(untagged)]
enum StatsBody {
    Dynamic {
        pid: u32,
        uptime_s: u64,
        cpu_percent: f64,
        memory_rss_mb: u64,
        disk_mb: u64,
    },
    Static {
        disk_mb: u64,
    },
}

async fn get_stats(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let deployment = match state.orchestrator.registry().get_by_name(&namespace, &name).await {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };
    let stats = match state.supervisor.get_stats(&deployment).await {
        Ok(stats) => stats,
        Err(e) => return error_response(&e),
    };

    let disk_mb = stats.disk_bytes / (1024 * 1024);
    let body = if deployment.is_dynamic() {
        StatsBody::Dynamic {
            pid: stats.pid,
            uptime_s: stats.uptime_s,
            cpu_percent: stats.cpu_percent,
            memory_rss_mb: stats.rss_bytes / (1024 * 1024),
            disk_mb,
        }
    } else {
        StatsBody::Static { disk_mb }
    };
    Json(body).into_response()
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_lines")]
    lines: u32,
}

fn default_lines() -> u32 {
    100
}

async fn get_logs(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let deployment = match state.orchestrator.registry().get_by_name(&namespace, &name).await {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };
    match state.supervisor.get_logs(&deployment, query.lines, false).await {
        Ok(mut stream) => {
            let mut lines = Vec::new();
            while let Some(line) = stream.next_line().await {
                lines.push(line);
            }
            Json(lines).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use orama_core::{
        DeploymentKind, ErrorKind, FsContentStore, HealthCheck, NodeRecord, NodeStatus,
        ResourceLimits, Result, epoch_secs,
    };
    use orama_orchestrator::{NewDeployment, NoopDns, OrchestratorContext};
    use orama_replica::bundle::archive_from_files;
    use orama_replica::{PeerClient, ReplicaHost};
    use orama_state::{EmbeddedStore, StateStore};
    use orama_supervisor::service::ServiceSpec;
    use orama_supervisor::{LogStream, ServiceBackend, ServiceStatus};
    use std::collections::HashMap;
    use std::path::Path;
    use tower::ServiceExt;

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
            let (tx, rx) = tokio::sync::mpsc::channel(4);
            tx.try_send("line one".to_string()).unwrap();
            Ok(LogStream::new(rx))
        }
        async fn pid(&self, _service: &str) -> Result<Option<u32>> {
            Ok(None)
        }
        async fn started_at(&self, _service: &str) -> Result<Option<u64>> {
            Ok(None)
        }
    }

    async fn api_fixture(data_root: &Path) -> (Router, DeploymentOrchestrator) {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        store
            .upsert_node(&NodeRecord {
                id: "node-a".to_string(),
                status: NodeStatus::Active,
                ip_address: "127.0.0.1".to_string(),
                last_seen: epoch_secs(),
            })
            .await
            .unwrap();

        let content = Arc::new(FsContentStore::new(data_root.join("objects")));
        let supervisor = Arc::new(Supervisor::with_backend(Box::new(AlwaysActive), data_root));
        let host = Arc::new(ReplicaHost::new(
            "node-a",
            data_root,
            store.clone() as Arc<dyn StateStore>,
            content.clone(),
            supervisor.clone(),
        ));
        let orchestrator = DeploymentOrchestrator::new(OrchestratorContext {
            node_id: "node-a".to_string(),
            base_domain: "orama.host".to_string(),
            replica_count: 1,
            data_root: data_root.to_path_buf(),
            store: store as Arc<dyn StateStore>,
            content,
            host,
            peers: PeerClient::new("replica-coordination", 59440).unwrap(),
            dns: Arc::new(NoopDns),
        });

        let router = api_router(ApiState {
            orchestrator: orchestrator.clone(),
            supervisor,
            shutdown: CancellationToken::new(),
        });
        (router, orchestrator)
    }

    fn static_upload(name: &str) -> NewDeployment {
        NewDeployment {
            namespace: "ns1".to_string(),
            name: name.to_string(),
            kind: DeploymentKind::Static,
            bundle: archive_from_files(&[("index.html", "<html>")]).unwrap(),
            environment: HashMap::new(),
            limits: ResourceLimits::default(),
            health: HealthCheck::default(),
            subdomain: None,
            deployed_by: "tester".to_string(),
        }
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn list_and_detail_include_urls() {
        let dir = tempfile::tempdir().unwrap();
        let (router, orchestrator) = api_fixture(dir.path()).await;
        orchestrator
            .create(static_upload("site"), &CancellationToken::new())
            .await
            .unwrap();

        let (status, list) = get_json(&router, "/deployments/ns1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, detail) = get_json(&router, "/deployments/ns1/site").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["status"], "active");
        assert_eq!(detail["version"], 1);
        assert_eq!(
            detail["urls"][0],
            serde_json::json!("https://site.node-a.orama.host")
        );
    }

    #[tokio::test]
    async fn missing_deployment_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = api_fixture(dir.path()).await;

        let (status, body) = get_json(&router, "/deployments/ns1/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not-found"));
        // Matches the taxonomy label, not a type name.
        assert_eq!(ErrorKind::NotFound.as_str(), "not-found");
    }

    #[tokio::test]
    async fn static_stats_expose_disk_only() {
        let dir = tempfile::tempdir().unwrap();
        let (router, orchestrator) = api_fixture(dir.path()).await;
        orchestrator
            .create(static_upload("site"), &CancellationToken::new())
            .await
            .unwrap();

        let (status, stats) = get_json(&router, "/deployments/ns1/site/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert!(stats.get("disk_mb").is_some());
        assert!(stats.get("pid").is_none());
        assert!(stats.get("cpu_percent").is_none());
    }

    #[tokio::test]
    async fn delete_cascades_through_the_api() {
        let dir = tempfile::tempdir().unwrap();
        let (router, orchestrator) = api_fixture(dir.path()).await;
        orchestrator
            .create(static_upload("site"), &CancellationToken::new())
            .await
            .unwrap();

        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/deployments/ns1/site")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let (status, _) = get_json(&router, "/deployments/ns1/site").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
