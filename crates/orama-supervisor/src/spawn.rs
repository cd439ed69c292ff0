//! Direct-spawn backend for development and non-systemd hosts.
//!
//! Forks deployment processes directly and tracks them in a map owned by
//! this backend instance (never process-global). Stdout/stderr are
//! redirected to a per-service log file; a background task per child
//! waits to reap it and clears the map entry on exit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{RwLock, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use orama_core::{Error, Result, epoch_secs};

use crate::service::ServiceSpec;
use crate::{LogStream, ServiceBackend, ServiceStatus};

const STOP_WAIT: Duration = Duration::from_secs(10);
const FOLLOW_POLL: Duration = Duration::from_millis(500);

struct ProcEntry {
    pid: u32,
    started_at: u64,
    kill: CancellationToken,
    exited: watch::Receiver<bool>,
}

/// Direct process spawner.
pub struct SpawnBackend {
    processes: Arc<RwLock<HashMap<String, ProcEntry>>>,
    log_dir: PathBuf,
}

impl SpawnBackend {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
            log_dir: log_dir.into(),
        }
    }

    fn log_path(&self, service: &str) -> PathBuf {
        self.log_dir.join(format!("{service}.log"))
    }
}

#[async_trait]
impl ServiceBackend for SpawnBackend {
    async fn start(&self, spec: &ServiceSpec) -> Result<()> {
        {
            let map = self.processes.read().await;
            if map.contains_key(&spec.service) {
                return Err(Error::already_exists(format!(
                    "{} is already running",
                    spec.service
                )));
            }
        }

        std::fs::create_dir_all(&self.log_dir)?;
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(&spec.service))?;
        let log_err = log.try_clone()?;

        let mut command = tokio::process::Command::new(&spec.command.program);
        command
            .args(&spec.command.args)
            .current_dir(&spec.workdir)
            .envs(spec.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        let mut child = command.spawn().map_err(|e| {
            Error::internal(format!(
                "failed to spawn {} ({}): {e}",
                spec.service, spec.command.program
            ))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| Error::internal(format!("{} exited before tracking", spec.service)))?;

        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(false);
        let entry = ProcEntry {
            pid,
            started_at: epoch_secs(),
            kill: kill.clone(),
            exited: exit_rx,
        };

        {
            let mut map = self.processes.write().await;
            map.insert(spec.service.clone(), entry);
        }

        // Reaper: wait for exit (or a kill request), then clear the entry.
        let service = spec.service.clone();
        let processes = self.processes.clone();
        tokio::spawn(async move {
            let killed = tokio::select! {
                status = child.wait() => {
                    info!(%service, pid, ?status, "process exited");
                    false
                }
                _ = kill.cancelled() => true,
            };
            if killed {
                let _ = child.start_kill();
                let _ = child.wait().await;
                info!(%service, pid, "process stopped");
            }
            let mut map = processes.write().await;
            if map.get(&service).map(|e| e.pid) == Some(pid) {
                map.remove(&service);
            }
            let _ = exit_tx.send(true);
        });

        info!(service = %spec.service, pid, "process started");
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<()> {
        let (kill, mut exited) = {
            let map = self.processes.read().await;
            match map.get(service) {
                Some(entry) => (entry.kill.clone(), entry.exited.clone()),
                None => {
                    debug!(%service, "stop requested but process not tracked");
                    return Ok(());
                }
            }
        };

        kill.cancel();
        if !*exited.borrow() {
            let _ = tokio::time::timeout(STOP_WAIT, exited.changed()).await;
        }
        Ok(())
    }

    async fn restart(&self, spec: &ServiceSpec) -> Result<()> {
        self.stop(&spec.service).await?;
        self.start(spec).await
    }

    async fn status(&self, service: &str) -> Result<ServiceStatus> {
        let map = self.processes.read().await;
        Ok(if map.contains_key(service) {
            ServiceStatus::Active
        } else {
            ServiceStatus::Inactive
        })
    }

    async fn logs(&self, service: &str, lines: u32, follow: bool) -> Result<LogStream> {
        let path = self.log_path(service);
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            let mut offset = content.len() as u64;
            for line in tail(&content, lines) {
                if tx.send(line.to_string()).await.is_err() {
                    return;
                }
            }
            if !follow {
                return;
            }
            loop {
                tokio::time::sleep(FOLLOW_POLL).await;
                let Ok(mut file) = tokio::fs::File::open(&path).await else {
                    continue;
                };
                let Ok(len) = file.seek(std::io::SeekFrom::End(0)).await else {
                    continue;
                };
                if len <= offset {
                    continue;
                }
                if file.seek(std::io::SeekFrom::Start(offset)).await.is_err() {
                    continue;
                }
                let mut appended = String::new();
                if file.read_to_string(&mut appended).await.is_err() {
                    continue;
                }
                offset = len;
                for line in appended.lines() {
                    if tx.send(line.to_string()).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(LogStream::new(rx))
    }

    async fn pid(&self, service: &str) -> Result<Option<u32>> {
        let map = self.processes.read().await;
        Ok(map.get(service).map(|e| e.pid))
    }

    async fn started_at(&self, service: &str) -> Result<Option<u64>> {
        let map = self.processes.read().await;
        Ok(map.get(service).map(|e| e.started_at))
    }
}

fn tail(content: &str, lines: u32) -> Vec<&str> {
    let all: Vec<&str> = content.lines().collect();
    let skip = all.len().saturating_sub(lines as usize);
    all[skip..].to_vec()
}
