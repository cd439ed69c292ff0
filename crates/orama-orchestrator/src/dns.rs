//! DNS record management capability.
//!
//! Record creation and deletion is owned by an external collaborator;
//! the orchestrator only schedules it. [`NoopDns`] is the standalone
//! implementation — it logs and succeeds.

use async_trait::async_trait;

use orama_core::{Deployment, Result};
use tracing::info;

/// External DNS collaborator.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn create_records(&self, deployment: &Deployment) -> Result<()>;
    async fn delete_records(&self, deployment: &Deployment) -> Result<()>;
}

/// Logging no-op provider for standalone nodes and tests.
pub struct NoopDns;

#[async_trait]
impl DnsProvider for NoopDns {
    async fn create_records(&self, deployment: &Deployment) -> Result<()> {
        info!(
            deployment = %deployment.id,
            name = %deployment.name,
            "dns record creation skipped (no provider configured)"
        );
        Ok(())
    }

    async fn delete_records(&self, deployment: &Deployment) -> Result<()> {
        info!(
            deployment = %deployment.id,
            name = %deployment.name,
            "dns record deletion skipped (no provider configured)"
        );
        Ok(())
    }
}
