//! Managed-service backend for Linux hosts running systemd.
//!
//! Renders the unit template into the system unit directory (via a
//! privileged helper when not running as root), then drives the service
//! with `systemctl`. Logs come from the journal.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use orama_core::{Error, Result};

use crate::service::ServiceSpec;
use crate::unit::render_unit;
use crate::{LogStream, ServiceBackend, ServiceStatus};

const UNIT_DIR: &str = "/etc/systemd/system";

/// systemd-backed service management.
pub struct SystemdBackend {
    unit_dir: PathBuf,
    /// Commands and unit installation go through sudo when the daemon is
    /// not running as root.
    sudo: bool,
}

impl SystemdBackend {
    pub fn new() -> Self {
        Self {
            unit_dir: PathBuf::from(UNIT_DIR),
            sudo: unsafe { libc::geteuid() } != 0,
        }
    }

    /// Whether this host runs systemd at all.
    pub fn available() -> bool {
        Path::new("/run/systemd/system").exists()
    }

    fn unit_path(&self, service: &str) -> PathBuf {
        self.unit_dir.join(format!("{service}.service"))
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<std::process::Output> {
        let mut command = if self.sudo {
            let mut c = tokio::process::Command::new("sudo");
            c.arg(program);
            c
        } else {
            tokio::process::Command::new(program)
        };
        let output = command.args(args).output().await.map_err(|e| {
            Error::internal(format!("failed to run {program} {}: {e}", args.join(" ")))
        })?;
        Ok(output)
    }

    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        let output = self.run("systemctl", args).await?;
        if !output.status.success() {
            return Err(Error::internal(format!(
                "systemctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn install_unit(&self, spec: &ServiceSpec) -> Result<()> {
        let contents = render_unit(spec);
        let staged = std::env::temp_dir().join(format!("{}.service", spec.service));
        tokio::fs::write(&staged, &contents).await?;

        let unit_path = self.unit_path(&spec.service);
        if self.sudo {
            let output = self
                .run(
                    "install",
                    &[
                        "-m",
                        "0644",
                        &staged.to_string_lossy(),
                        &unit_path.to_string_lossy(),
                    ],
                )
                .await?;
            if !output.status.success() {
                return Err(Error::internal(format!(
                    "failed to install unit {}: {}",
                    unit_path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        } else {
            tokio::fs::copy(&staged, &unit_path).await?;
        }
        let _ = tokio::fs::remove_file(&staged).await;

        debug!(service = %spec.service, unit = %unit_path.display(), "unit installed");
        Ok(())
    }
}

impl Default for SystemdBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceBackend for SystemdBackend {
    async fn start(&self, spec: &ServiceSpec) -> Result<()> {
        self.install_unit(spec).await?;
        self.systemctl(&["daemon-reload"]).await?;
        self.systemctl(&["enable", &spec.service]).await?;
        self.systemctl(&["start", &spec.service]).await?;
        info!(service = %spec.service, "service started");
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<()> {
        // Stopping an unknown unit is not an error for teardown purposes.
        if let Err(e) = self.systemctl(&["stop", service]).await {
            warn!(%service, error = %e, "systemctl stop failed");
        }
        if let Err(e) = self.systemctl(&["disable", service]).await {
            debug!(%service, error = %e, "systemctl disable failed");
        }
        Ok(())
    }

    async fn restart(&self, spec: &ServiceSpec) -> Result<()> {
        // Re-render the unit first: env, limits, or the entry binary may
        // have changed with the new version.
        self.install_unit(spec).await?;
        self.systemctl(&["daemon-reload"]).await?;
        self.systemctl(&["restart", &spec.service]).await?;
        info!(service = %spec.service, "service restarted");
        Ok(())
    }

    async fn status(&self, service: &str) -> Result<ServiceStatus> {
        // `is-active` exits non-zero for anything but active; the word on
        // stdout is still authoritative.
        let output = match self.run("systemctl", &["is-active", service]).await {
            Ok(output) => output,
            Err(_) => return Ok(ServiceStatus::Unknown),
        };
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(match state.as_str() {
            "active" => ServiceStatus::Active,
            "inactive" | "failed" | "deactivating" => ServiceStatus::Inactive,
            _ => ServiceStatus::Unknown,
        })
    }

    async fn logs(&self, service: &str, lines: u32, follow: bool) -> Result<LogStream> {
        let mut command = tokio::process::Command::new("journalctl");
        command
            .args(["-u", service, "-n", &lines.to_string(), "--no-pager", "-o", "cat"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if follow {
            command.arg("-f");
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::internal(format!("failed to run journalctl: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("journalctl stdout unavailable"))?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tx.send(line).await.is_err() {
                    let _ = child.start_kill();
                    break;
                }
            }
            let _ = child.wait().await;
        });

        Ok(LogStream::new(rx))
    }

    async fn pid(&self, service: &str) -> Result<Option<u32>> {
        let output = self
            .run("systemctl", &["show", service, "--property=MainPID", "--value"])
            .await?;
        let pid: u32 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0);
        Ok((pid != 0).then_some(pid))
    }

    async fn started_at(&self, _service: &str) -> Result<Option<u64>> {
        // Uptime is derived from /proc start ticks instead.
        Ok(None)
    }
}
