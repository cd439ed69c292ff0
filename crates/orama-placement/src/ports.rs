//! Per-node TCP port reservation.
//!
//! The allocator is stateless: the only serialization point is the store's
//! unique constraint on `(node_id, port)`. On a constraint violation a peer
//! raced the same slot, so the allocator re-reads and retries with
//! exponential backoff. Ports are taken lowest-gap-first so deallocations
//! are reused and the active range stays compact.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use orama_core::{Error, ErrorKind, PortAllocation, Result, epoch_secs};
use orama_state::StateStore;

/// User-allocatable port range. `[10000, 10099]` below it is reserved for
/// system services.
pub const USER_PORT_MIN: u16 = 10100;
pub const USER_PORT_MAX: u16 = 19999;

/// Maximum user ports per node.
pub const MAX_PORTS_PER_NODE: u32 = (USER_PORT_MAX - USER_PORT_MIN) as u32 + 1;

const MAX_ATTEMPTS: u32 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Reserves TCP ports on named nodes for deployments.
#[derive(Clone)]
pub struct PortAllocator {
    store: Arc<dyn StateStore>,
}

impl PortAllocator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Reserve the lowest available user port on `node_id` for
    /// `deployment_id`. The reservation is durable before this returns;
    /// two concurrent callers for the same node never observe the same
    /// port.
    pub async fn allocate(
        &self,
        node_id: &str,
        deployment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<u16> {
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_ATTEMPTS {
            let allocated = self.store.list_ports(node_id).await?;
            let port = lowest_gap(&allocated).ok_or_else(|| {
                Error::no_ports_available(format!("port range exhausted on node {node_id}"))
            })?;

            let allocation = PortAllocation {
                node_id: node_id.to_string(),
                port,
                deployment_id: deployment_id.to_string(),
                allocated_at: epoch_secs(),
            };

            match self.store.insert_port_allocation(&allocation).await {
                Ok(()) => {
                    debug!(node = %node_id, deployment = %deployment_id, port, "port allocated");
                    return Ok(port);
                }
                Err(e) if e.is(ErrorKind::AlreadyExists) => {
                    // A peer raced this slot; back off and rescan.
                    warn!(
                        node = %node_id,
                        port,
                        attempt,
                        "port reservation conflicted, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => {
                            return Err(Error::internal("port allocation cancelled"));
                        }
                    }
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::retry_exhausted(format!(
            "gave up allocating a port on node {node_id} after {MAX_ATTEMPTS} attempts"
        )))
    }

    /// Release every port held by a deployment, on every node. Idempotent.
    pub async fn deallocate(&self, deployment_id: &str) -> Result<()> {
        let released = self.store.delete_port_allocations(deployment_id).await?;
        debug!(deployment = %deployment_id, released, "ports released");
        Ok(())
    }

    pub async fn count_allocated(&self, node_id: &str) -> Result<u32> {
        self.store.count_ports(node_id).await
    }

    pub async fn count_available(&self, node_id: &str) -> Result<u32> {
        let allocated = self.store.count_ports(node_id).await?;
        Ok(MAX_PORTS_PER_NODE.saturating_sub(allocated))
    }
}

/// Scan upward from the bottom of the user range until a gap is found.
/// `allocated` must be ascending. Returns `None` when the range is full.
fn lowest_gap(allocated: &[u16]) -> Option<u16> {
    let mut candidate = USER_PORT_MIN;
    for &port in allocated {
        if port < USER_PORT_MIN {
            continue;
        }
        if port > candidate {
            break;
        }
        if port == candidate {
            candidate = candidate.checked_add(1)?;
        }
    }
    (candidate <= USER_PORT_MAX).then_some(candidate)
}
