//! Capacity scoring for node selection.
//!
//! Evaluates candidate nodes using a weighted combination of sub-scores,
//! each in `[0, 1]` with higher meaning more headroom:
//! - **deployments**: process count dominates admission pressure
//! - **ports**: allocated ports out of the user range
//! - **memory** / **cpu**: balancing correctives
//!
//! The node with the highest total wins; exact ties break toward the
//! lexicographically smaller node id so every reader picks the same node.

use std::collections::HashMap;

use orama_core::{NodeRecord, Result, epoch_secs};
use orama_state::StateStore;

/// Nodes without a heartbeat in this window are invisible to scoring.
pub const NODE_STALE_AFTER_S: u64 = 120;

/// Capacity ceilings the sub-scores are normalized against.
pub const MAX_DEPLOYMENTS_PER_NODE: f64 = 100.0;
pub const MAX_PORTS_PER_NODE: f64 = 9900.0;
pub const MAX_MEMORY_MB_PER_NODE: f64 = 8192.0;
pub const MAX_CPU_PCT_PER_NODE: f64 = 400.0;

/// Aggregated resource usage for a single schedulable node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeUsage {
    pub node_id: String,
    pub active_deployments: u32,
    pub allocated_ports: u32,
    pub used_memory_mb: u64,
    pub used_cpu_percent: u32,
}

/// Scored result for a single node. Total is the weighted sum of the
/// breakdown, itself in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct NodeScore {
    pub node_id: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Individual sub-scores, each clamped to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub deployments: f64,
    pub ports: f64,
    pub memory: f64,
    pub cpu: f64,
}

/// Weights for the scoring components.
///
/// Deployment count dominates; the weight is a tunable constant.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub deployments: f64,
    pub ports: f64,
    pub memory: f64,
    pub cpu: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            deployments: 0.4,
            ports: 0.2,
            memory: 0.2,
            cpu: 0.2,
        }
    }
}

/// Headroom sub-score: `1 − used/capacity`, clamped to `[0, 1]`.
fn headroom(used: f64, capacity: f64) -> f64 {
    (1.0 - used / capacity).clamp(0.0, 1.0)
}

/// Score a single node from its aggregated usage.
pub fn score_node(usage: &NodeUsage, weights: &ScoringWeights) -> NodeScore {
    let breakdown = ScoreBreakdown {
        deployments: headroom(f64::from(usage.active_deployments), MAX_DEPLOYMENTS_PER_NODE),
        ports: headroom(f64::from(usage.allocated_ports), MAX_PORTS_PER_NODE),
        memory: headroom(usage.used_memory_mb as f64, MAX_MEMORY_MB_PER_NODE),
        cpu: headroom(f64::from(usage.used_cpu_percent), MAX_CPU_PCT_PER_NODE),
    };

    let score = weights.deployments * breakdown.deployments
        + weights.ports * breakdown.ports
        + weights.memory * breakdown.memory
        + weights.cpu * breakdown.cpu;

    NodeScore {
        node_id: usage.node_id.clone(),
        score,
        breakdown,
    }
}

/// Score all nodes and return them best-first. A single sort suffices;
/// exact ties break toward the lexicographically smaller node id.
pub fn rank_nodes(usages: &[NodeUsage], weights: &ScoringWeights) -> Vec<NodeScore> {
    let mut scores: Vec<NodeScore> = usages.iter().map(|u| score_node(u, weights)).collect();
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    scores
}

/// Gather aggregated usage for every schedulable node.
///
/// A node is schedulable when its registry status is active and its last
/// heartbeat is within [`NODE_STALE_AFTER_S`]. Deployment, memory, and cpu
/// figures come from the cached footprints on home-node assignments; port
/// counts come from the allocation table.
pub async fn schedulable_usages(store: &dyn StateStore) -> Result<Vec<NodeUsage>> {
    let now = epoch_secs();
    let nodes = store.list_nodes().await?;
    let assignments = store.list_assignments().await?;

    let mut per_node: HashMap<String, (u32, u64, u32)> = HashMap::new();
    for a in &assignments {
        let entry = per_node.entry(a.home_node_id.clone()).or_default();
        entry.0 += a.deployment_count;
        entry.1 += a.total_memory_mb;
        entry.2 += a.total_cpu_percent;
    }

    let mut usages = Vec::new();
    for node in nodes_visible(&nodes, now) {
        let (deployments, memory_mb, cpu_pct) =
            per_node.get(&node.id).copied().unwrap_or_default();
        let ports = store.count_ports(&node.id).await?;
        usages.push(NodeUsage {
            node_id: node.id.clone(),
            active_deployments: deployments,
            allocated_ports: ports,
            used_memory_mb: memory_mb,
            used_cpu_percent: cpu_pct,
        });
    }
    Ok(usages)
}

fn nodes_visible(nodes: &[NodeRecord], now: u64) -> impl Iterator<Item = &NodeRecord> {
    nodes
        .iter()
        .filter(move |n| n.is_schedulable(now, NODE_STALE_AFTER_S))
}
