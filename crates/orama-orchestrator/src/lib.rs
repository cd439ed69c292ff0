//! orama-orchestrator — the top-level deployment driver.
//!
//! Invoked by the gateway handler with a validated upload, the
//! orchestrator resolves the home node, reserves ports, persists content,
//! registers the deployment, brings up the primary and secondary
//! replicas, and transitions the record to active — or fails cleanly.
//! Updates and rollbacks fan out to every active replica in parallel and
//! commit only when at least half of them end healthy.
//!
//! External collaborators (DNS, the content cluster, the replicated SQL
//! store) are consumed through injected trait objects.

pub mod dns;
pub mod orchestrator;

pub use dns::{DnsProvider, NoopDns};
pub use orchestrator::{
    DeploymentOrchestrator, NewDeployment, OrchestratorContext, deployment_urls,
};
