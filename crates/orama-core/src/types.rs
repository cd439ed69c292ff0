//! Domain types persisted in the replicated state store.
//!
//! All types are JSON-serializable. Enum wire names are kebab- or
//! snake-case to match what the internal RPC and the store carry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Unique identifier for a node in the fleet.
pub type NodeId = String;

// ── Deployment ─────────────────────────────────────────────────────

/// What kind of workload a deployment is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentKind {
    Static,
    Ssr,
    NodeBackend,
    GoBackend,
    StaticExport,
    Wasm,
}

impl DeploymentKind {
    /// Dynamic deployments run a process and therefore need a port.
    /// Static kinds are served directly from content storage by the ingress.
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            DeploymentKind::Ssr | DeploymentKind::NodeBackend | DeploymentKind::GoBackend
        )
    }
}

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Deploying,
    Active,
    Failed,
    Stopped,
    Updating,
}

/// What the supervisor does when the process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

/// Health contract for a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// HTTP path probed by the ingress (e.g. "/healthz").
    pub path: String,
    /// Probe interval in seconds.
    pub interval_s: u32,
    pub restart: RestartPolicy,
    /// Restart attempts before the supervisor gives up.
    pub max_restart_count: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            interval_s: 10,
            restart: RestartPolicy::OnFailure,
            max_restart_count: 5,
        }
    }
}

/// Per-deployment resource caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    pub cpu_pct: u32,
    pub disk_mb: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_pct: 100,
            disk_mb: 1024,
        }
    }
}

/// The canonical user-visible deployment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeploymentKind,
    /// Monotonically increasing version; never decreases.
    pub version: u64,
    pub status: DeploymentStatus,
    pub content_cid: String,
    pub build_cid: String,
    /// Node authoritatively responsible for this deployment.
    /// Non-empty once the deploying phase completes.
    pub home_node_id: NodeId,
    /// Allocated TCP port on the home node; 0 for static kinds.
    pub port: u16,
    pub subdomain: Option<String>,
    pub environment: HashMap<String, String>,
    pub limits: ResourceLimits,
    pub health: HealthCheck,
    pub created_at: u64,
    pub updated_at: u64,
    pub deployed_by: String,
}

impl Deployment {
    pub fn is_dynamic(&self) -> bool {
        self.kind.is_dynamic()
    }

    /// Composite name key, unique per namespace.
    pub fn name_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// ── Replica ────────────────────────────────────────────────────────

/// Lifecycle status of one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Pending,
    Active,
    Failed,
    Removing,
}

/// A placement of a deployment on one node. Unique per
/// `(deployment_id, node_id)`; exactly one replica per deployment
/// is the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    pub deployment_id: DeploymentId,
    pub node_id: NodeId,
    /// Port allocated on that node; 0 for static kinds.
    pub port: u16,
    pub status: ReplicaStatus,
    pub is_primary: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Replica {
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.deployment_id, self.node_id)
    }
}

// ── Port allocation ────────────────────────────────────────────────

/// A reservation of one TCP port on one node. Unique per `(node_id, port)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortAllocation {
    pub node_id: NodeId,
    pub port: u16,
    pub deployment_id: DeploymentId,
    pub allocated_at: u64,
}

// ── Home node assignment ───────────────────────────────────────────

/// Namespace-to-home-node mapping with a cached resource footprint.
/// Unique per namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeNodeAssignment {
    pub namespace: String,
    pub home_node_id: NodeId,
    pub assigned_at: u64,
    pub last_heartbeat: u64,
    pub deployment_count: u32,
    pub total_memory_mb: u64,
    pub total_cpu_percent: u32,
}

// ── Deployment history ─────────────────────────────────────────────

/// How a history entry was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Deployed,
    Updated,
    RolledBack,
}

/// Append-only version log entry for a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub deployment_id: DeploymentId,
    pub version: u64,
    pub content_cid: String,
    pub build_cid: String,
    pub deployed_at: u64,
    pub deployed_by: String,
    pub status: HistoryStatus,
    /// Set when this entry records a rollback: the version rolled back from.
    pub rollback_from_version: Option<u64>,
}

// ── Node registry ──────────────────────────────────────────────────

/// Fleet membership status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Draining,
    Dead,
}

/// A node in the fleet, as read by capacity scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub status: NodeStatus,
    pub ip_address: String,
    pub last_seen: u64,
}

impl NodeRecord {
    /// Whether this node is visible to capacity scoring: status active and
    /// a heartbeat within `threshold_s` of `now`.
    pub fn is_schedulable(&self, now: u64, threshold_s: u64) -> bool {
        self.status == NodeStatus::Active && now.saturating_sub(self.last_seen) <= threshold_s
    }
}
