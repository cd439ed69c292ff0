//! Inbound HTTP handlers for the replica RPC.
//!
//! Mounted by the daemon under `/internal/v1`. Every request must carry
//! `X-Orama-Internal-Auth` with the fleet token; anything else is 403.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tokio_util::sync::CancellationToken;

use orama_core::{Error, ErrorKind};

use crate::actions::ReplicaHost;
use crate::protocol::*;

/// Shared state for the replica endpoints.
#[derive(Clone)]
pub struct ReplicaState {
    pub host: Arc<ReplicaHost>,
    pub auth_token: String,
    /// Node-wide shutdown token; each request gets a child of it.
    pub shutdown: CancellationToken,
}

/// Build the replica RPC router.
pub fn replica_router(state: ReplicaState) -> Router {
    Router::new()
        .route("/replica/setup", post(setup))
        .route("/replica/update", post(update))
        .route("/replica/rollback", post(rollback))
        .route("/replica/teardown", post(teardown))
        .with_state(state)
}

/// Map an error kind to its HTTP status.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound | ErrorKind::NamespaceNotAssigned => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NoNodesAvailable
        | ErrorKind::NoPortsAvailable
        | ErrorKind::RetryExhausted
        | ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::PeerRpc => StatusCode::BAD_GATEWAY,
        ErrorKind::HealthCheck | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render an error as `{"error": ...}` with its mapped status.
pub fn error_response(err: &Error) -> Response {
    (
        status_for(err.kind()),
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn authorize(state: &ReplicaState, headers: &HeaderMap) -> Result<(), Response> {
    let presented = headers
        .get(INTERNAL_AUTH_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.auth_token.as_str()) {
        return Err(error_response(&Error::forbidden(
            "missing or invalid internal auth header",
        )));
    }
    Ok(())
}

async fn setup(
    State(state): State<ReplicaState>,
    headers: HeaderMap,
    Json(req): Json<SetupRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.host.setup(&req, &state.shutdown.child_token()).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn update(
    State(state): State<ReplicaState>,
    headers: HeaderMap,
    Json(req): Json<UpdateRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.host.update(&req, &state.shutdown.child_token()).await {
        Ok(()) => Json(AckResponse {
            node_id: state.host.node_id().to_string(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn rollback(
    State(state): State<ReplicaState>,
    headers: HeaderMap,
    Json(req): Json<UpdateRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.host.rollback(&req, &state.shutdown.child_token()).await {
        Ok(()) => Json(AckResponse {
            node_id: state.host.node_id().to_string(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn teardown(
    State(state): State<ReplicaState>,
    headers: HeaderMap,
    Json(req): Json<TeardownRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    match state.host.teardown(&req).await {
        Ok(()) => Json(AckResponse {
            node_id: state.host.node_id().to_string(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::{fixture, setup_request};
    use crate::bundle::archive_from_files;
    use axum::body::Body;
    use axum::http::Request;
    use orama_core::{ContentStore, DeploymentKind};
    use tower::ServiceExt;

    async fn router_fixture(dir: &std::path::Path) -> (Router, crate::actions::testing::Fixture) {
        let fx = fixture("node-a", dir);
        let router = replica_router(ReplicaState {
            host: fx.host.clone(),
            auth_token: "replica-coordination".to_string(),
            shutdown: CancellationToken::new(),
        });
        (router, fx)
    }

    fn post_json(uri: &str, auth: Option<&str>, body: &impl serde::Serialize) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = auth {
            builder = builder.header(INTERNAL_AUTH_HEADER, token);
        }
        builder
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_auth_header_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _fx) = router_fixture(dir.path()).await;

        let req = setup_request(DeploymentKind::Static, "cid");
        let resp = router
            .oneshot(post_json("/replica/setup", None, &req))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn wrong_token_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _fx) = router_fixture(dir.path()).await;

        let req = setup_request(DeploymentKind::Static, "cid");
        let resp = router
            .oneshot(post_json("/replica/setup", Some("guess"), &req))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn authorized_setup_returns_port_and_node() {
        let dir = tempfile::tempdir().unwrap();
        let (router, fx) = router_fixture(dir.path()).await;

        let archive = archive_from_files(&[("index.html", "<html>")]).unwrap();
        let cid = fx.content.add(&archive).await.unwrap();
        let req = setup_request(DeploymentKind::Static, &cid);

        let resp = router
            .oneshot(post_json(
                "/replica/setup",
                Some("replica-coordination"),
                &req,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let parsed: SetupResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.port, 0);
        assert_eq!(parsed.node_id, "node-a");
    }

    #[tokio::test]
    async fn setup_with_missing_blob_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _fx) = router_fixture(dir.path()).await;

        let req = setup_request(DeploymentKind::Static, "no-such-cid");
        let resp = router
            .oneshot(post_json(
                "/replica/setup",
                Some("replica-coordination"),
                &req,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert!(body.error.contains("not-found"));
    }

    #[tokio::test]
    async fn static_update_acks_without_work() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _fx) = router_fixture(dir.path()).await;

        let req = crate::actions::testing::update_request(DeploymentKind::Static, "cid");
        let resp = router
            .oneshot(post_json(
                "/replica/update",
                Some("replica-coordination"),
                &req,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let parsed: AckResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.node_id, "node-a");
    }

    #[tokio::test]
    async fn teardown_is_authorized_and_acks() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _fx) = router_fixture(dir.path()).await;

        let req = TeardownRequest {
            deployment_id: "dep-1".to_string(),
            namespace: "ns1".to_string(),
            name: "app".to_string(),
            kind: DeploymentKind::Static,
        };
        let resp = router
            .oneshot(post_json(
                "/replica/teardown",
                Some("replica-coordination"),
                &req,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
