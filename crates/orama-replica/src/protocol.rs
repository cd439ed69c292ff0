//! Wire shapes for the internal replica RPC.
//!
//! All endpoints are JSON POSTs under `/internal/v1/replica/` and require
//! the internal auth header. Errors come back as `{"error": "..."}` with
//! an appropriate HTTP status.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use orama_core::{DeploymentKind, HealthCheck, ResourceLimits};

/// Header carrying the fleet-internal auth token.
pub const INTERNAL_AUTH_HEADER: &str = "x-orama-internal-auth";

/// Ask a node to set up a replica: allocate a local port, fetch and
/// extract the content, start the process, and record the replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupRequest {
    pub deployment_id: String,
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeploymentKind,
    pub content_cid: String,
    pub build_cid: String,
    pub environment: HashMap<String, String>,
    pub health: HealthCheck,
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupResponse {
    /// Port allocated on the responding node (0 for static kinds).
    pub port: u16,
    pub node_id: String,
}

/// Ask a node to swap its replica to new content. Rollback uses the same
/// shape with the target cids taken from history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub deployment_id: String,
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeploymentKind,
    pub content_cid: String,
    pub build_cid: String,
    pub new_version: u64,
}

/// Ask a node to stop and remove its replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownRequest {
    pub deployment_id: String,
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeploymentKind,
}

/// Plain acknowledgement from update/rollback/teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub node_id: String,
}

/// JSON error body shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
