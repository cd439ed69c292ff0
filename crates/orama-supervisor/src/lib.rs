//! orama-supervisor — OS-level deployment lifecycle on a single node.
//!
//! Every node runs one [`Supervisor`] for the deployments whose home (or
//! replica) lives there. Two backends implement [`ServiceBackend`]:
//!
//! - [`systemd::SystemdBackend`] on Linux hosts with systemd: sandboxed
//!   units, journal logs, `systemctl` lifecycle
//! - [`spawn::SpawnBackend`] everywhere else: direct process spawning
//!   with a per-instance process map and log files
//!
//! The backend is chosen once at initialization from the host OS. Static
//! deployment kinds have no process; for them "healthy" means the content
//! is extracted in place.

pub mod proc;
pub mod service;
pub mod spawn;
pub mod systemd;
pub mod unit;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use orama_core::{Deployment, Error, Result, epoch_secs, paths};

use service::{ServiceSpec, build_service_spec, service_name};

/// How often `wait_healthy` polls the service status.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Observed state of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Unknown,
}

/// Point-in-time process statistics for a deployment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceStats {
    pub pid: u32,
    pub cpu_percent: f64,
    pub rss_bytes: u64,
    pub disk_bytes: u64,
    pub uptime_s: u64,
}

/// A line-oriented log stream from a backend.
#[derive(Debug)]
pub struct LogStream {
    rx: mpsc::Receiver<String>,
}

impl LogStream {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next log line; `None` once the stream ends (never, while following
    /// a live service).
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// OS-level service management implemented per supervision backend.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    async fn start(&self, spec: &ServiceSpec) -> Result<()>;
    async fn stop(&self, service: &str) -> Result<()>;
    async fn restart(&self, spec: &ServiceSpec) -> Result<()>;
    async fn status(&self, service: &str) -> Result<ServiceStatus>;
    async fn logs(&self, service: &str, lines: u32, follow: bool) -> Result<LogStream>;
    async fn pid(&self, service: &str) -> Result<Option<u32>>;
    /// Unix start time, when the backend tracks it directly. Backends
    /// returning `None` get uptime derived from /proc.
    async fn started_at(&self, service: &str) -> Result<Option<u64>>;
}

/// Local supervisor for one node.
pub struct Supervisor {
    backend: Box<dyn ServiceBackend>,
    data_root: PathBuf,
}

impl Supervisor {
    /// Build a supervisor with the backend appropriate for this host.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        let backend: Box<dyn ServiceBackend> =
            if cfg!(target_os = "linux") && systemd::SystemdBackend::available() {
                info!("using systemd supervision backend");
                Box::new(systemd::SystemdBackend::new())
            } else {
                info!("using direct-spawn supervision backend");
                Box::new(spawn::SpawnBackend::new(data_root.join("logs")))
            };
        Self { backend, data_root }
    }

    /// Build a supervisor around an explicit backend (tests, embedding).
    pub fn with_backend(backend: Box<dyn ServiceBackend>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            data_root: data_root.into(),
        }
    }

    /// Canonical workdir for a deployment on this node.
    pub fn workdir(&self, namespace: &str, name: &str) -> PathBuf {
        paths::deployment_dir(&self.data_root, namespace, name)
    }

    /// Start the deployment's process from `workdir`. A no-op for static
    /// kinds, which have no process.
    pub async fn start(&self, deployment: &Deployment, workdir: &Path) -> Result<()> {
        match build_service_spec(deployment, workdir)? {
            Some(spec) => self.backend.start(&spec).await,
            None => Ok(()),
        }
    }

    pub async fn stop(&self, deployment: &Deployment) -> Result<()> {
        if !deployment.is_dynamic() {
            return Ok(());
        }
        self.backend
            .stop(&service_name(&deployment.namespace, &deployment.name))
            .await
    }

    pub async fn restart(&self, deployment: &Deployment, workdir: &Path) -> Result<()> {
        match build_service_spec(deployment, workdir)? {
            Some(spec) => self.backend.restart(&spec).await,
            None => Ok(()),
        }
    }

    /// Current status. For static kinds this reports whether the content
    /// is extracted in place.
    pub async fn status(&self, deployment: &Deployment) -> Result<ServiceStatus> {
        if !deployment.is_dynamic() {
            let workdir = self.workdir(&deployment.namespace, &deployment.name);
            let present = tokio::fs::try_exists(&workdir).await.unwrap_or(false);
            return Ok(if present {
                ServiceStatus::Active
            } else {
                ServiceStatus::Inactive
            });
        }
        self.backend
            .status(&service_name(&deployment.namespace, &deployment.name))
            .await
    }

    pub async fn get_logs(&self, deployment: &Deployment, lines: u32, follow: bool) -> Result<LogStream> {
        if !deployment.is_dynamic() {
            return Err(Error::validation(format!(
                "{}/{} is a static deployment and has no process logs",
                deployment.namespace, deployment.name
            )));
        }
        self.backend
            .logs(&service_name(&deployment.namespace, &deployment.name), lines, follow)
            .await
    }

    /// Process and disk statistics. Static kinds report disk usage only.
    pub async fn get_stats(&self, deployment: &Deployment) -> Result<ServiceStats> {
        let workdir = self.workdir(&deployment.namespace, &deployment.name);
        let disk_bytes = proc::dir_size_bytes(&workdir);

        if !deployment.is_dynamic() {
            return Ok(ServiceStats {
                pid: 0,
                cpu_percent: 0.0,
                rss_bytes: 0,
                disk_bytes,
                uptime_s: 0,
            });
        }

        let service = service_name(&deployment.namespace, &deployment.name);
        let pid = self
            .backend
            .pid(&service)
            .await?
            .ok_or_else(|| Error::not_found(format!("{service} is not running")))?;

        let cpu_percent = proc::sample_cpu_percent(pid).await.unwrap_or(0.0);
        let rss_bytes = proc::read_rss_bytes(pid).unwrap_or(0);
        let uptime_s = match self.backend.started_at(&service).await? {
            Some(started) => epoch_secs().saturating_sub(started),
            None => proc::process_uptime_s(pid).unwrap_or(0),
        };

        Ok(ServiceStats {
            pid,
            cpu_percent,
            rss_bytes,
            disk_bytes,
            uptime_s,
        })
    }

    /// Poll `status()` every two seconds until the deployment reports
    /// active or `timeout` elapses.
    pub async fn wait_healthy(
        &self,
        deployment: &Deployment,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.status(deployment).await? == ServiceStatus::Active {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::health_check(format!(
                    "{}/{} did not become healthy within {timeout:?}",
                    deployment.namespace, deployment.name
                )));
            }
            tokio::select! {
                _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    return Err(Error::internal("health wait cancelled"));
                }
            }
        }
    }
}
