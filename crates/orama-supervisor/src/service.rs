//! Service naming and start-command selection.

use std::path::{Path, PathBuf};

use orama_core::{Deployment, DeploymentKind, Error, RestartPolicy, Result};

/// Environment variable naming the entry point for node backends.
pub const ENTRY_POINT_VAR: &str = "ENTRY_POINT";

/// OS service name for a deployment: `orama-deploy-<ns>-<name>`, with
/// dots replaced by dashes (systemd treats dots as unit-type separators).
pub fn service_name(namespace: &str, name: &str) -> String {
    format!("orama-deploy-{namespace}-{name}").replace('.', "-")
}

/// The process a dynamic deployment runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Everything a backend needs to run one deployment's process.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub service: String,
    pub namespace: String,
    pub name: String,
    pub workdir: PathBuf,
    pub command: StartCommand,
    /// Sorted for deterministic unit rendering.
    pub env: Vec<(String, String)>,
    pub restart: RestartPolicy,
    pub max_restart_count: u32,
    pub memory_mb: u32,
    pub cpu_pct: u32,
}

/// Build the service spec for a deployment, or `None` for static kinds
/// (their content is served by the ingress; there is no process).
pub fn build_service_spec(deployment: &Deployment, workdir: &Path) -> Result<Option<ServiceSpec>> {
    let Some(command) = start_command(deployment, workdir)? else {
        return Ok(None);
    };

    let mut env: Vec<(String, String)> = deployment
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    env.push(("PORT".to_string(), deployment.port.to_string()));
    env.sort();

    Ok(Some(ServiceSpec {
        service: service_name(&deployment.namespace, &deployment.name),
        namespace: deployment.namespace.clone(),
        name: deployment.name.clone(),
        workdir: workdir.to_path_buf(),
        command,
        env,
        restart: deployment.health.restart,
        max_restart_count: deployment.health.max_restart_count,
        memory_mb: deployment.limits.memory_mb,
        cpu_pct: deployment.limits.cpu_pct,
    }))
}

/// Pick the start command by deployment kind.
pub fn start_command(deployment: &Deployment, workdir: &Path) -> Result<Option<StartCommand>> {
    match deployment.kind {
        DeploymentKind::Static | DeploymentKind::StaticExport | DeploymentKind::Wasm => Ok(None),
        DeploymentKind::Ssr => Ok(Some(StartCommand {
            program: "node".to_string(),
            args: vec!["server.js".to_string()],
        })),
        DeploymentKind::NodeBackend => {
            let entry = deployment
                .environment
                .get(ENTRY_POINT_VAR)
                .cloned()
                .unwrap_or_else(|| "index.js".to_string());
            Ok(Some(StartCommand {
                program: "node".to_string(),
                args: vec![entry],
            }))
        }
        DeploymentKind::GoBackend => {
            let binary = find_go_binary(workdir)?;
            Ok(Some(StartCommand {
                program: binary.to_string_lossy().into_owned(),
                args: Vec::new(),
            }))
        }
    }
}

/// Locate the compiled binary in a go-backend workdir: the first
/// executable regular file that passes an ELF magic check, preferring
/// one literally named `app`.
fn find_go_binary(workdir: &Path) -> Result<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(workdir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    // `app` first if present, then directory order.
    entries.sort_by_key(|p| p.file_name().map(|n| n != "app").unwrap_or(true));

    for path in entries {
        if is_executable_elf(&path) {
            return Ok(path);
        }
    }
    Err(Error::validation(format!(
        "no executable binary found in {}",
        workdir.display()
    )))
}

fn is_executable_elf(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        if meta.permissions().mode() & 0o111 == 0 {
            return false;
        }
    }
    let Ok(bytes) = std::fs::read(path) else {
        return false;
    };
    bytes.starts_with(&[0x7f, b'E', b'L', b'F'])
}
