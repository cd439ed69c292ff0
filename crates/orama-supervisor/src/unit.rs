//! systemd unit rendering for managed deployments.
//!
//! Every unit gets the same sandboxing: private /tmp, a read-only view of
//! the system and home directories, and exactly one writable path — the
//! deployment's own workdir.

use orama_core::RestartPolicy;

use crate::service::ServiceSpec;

/// Render the unit file for a deployment service.
pub fn render_unit(spec: &ServiceSpec) -> String {
    let mut env_lines = String::new();
    for (key, value) in &spec.env {
        env_lines.push_str(&format!("Environment=\"{key}={value}\"\n"));
    }

    format!(
        "[Unit]\n\
         Description=Orama deployment {namespace}/{name}\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         WorkingDirectory={workdir}\n\
         ExecStart={exec_start}\n\
         {env_lines}\
         Restart={restart}\n\
         StartLimitBurst={max_restarts}\n\
         MemoryMax={memory_mb}M\n\
         CPUQuota={cpu_pct}%\n\
         SyslogIdentifier={service}\n\
         PrivateTmp=true\n\
         ProtectSystem=full\n\
         ProtectHome=read-only\n\
         ReadWritePaths={workdir}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        namespace = spec.namespace,
        name = spec.name,
        workdir = spec.workdir.display(),
        exec_start = exec_start(spec),
        env_lines = env_lines,
        restart = restart_directive(spec.restart),
        max_restarts = spec.max_restart_count,
        memory_mb = spec.memory_mb,
        cpu_pct = spec.cpu_pct,
        service = spec.service,
    )
}

/// systemd requires an absolute ExecStart; non-absolute programs (`node`)
/// go through `/usr/bin/env` for PATH resolution.
fn exec_start(spec: &ServiceSpec) -> String {
    let mut parts = Vec::new();
    if !spec.command.program.starts_with('/') {
        parts.push("/usr/bin/env".to_string());
    }
    parts.push(spec.command.program.clone());
    parts.extend(spec.command.args.iter().cloned());
    parts.join(" ")
}

fn restart_directive(policy: RestartPolicy) -> &'static str {
    match policy {
        RestartPolicy::Always => "always",
        RestartPolicy::OnFailure => "on-failure",
        RestartPolicy::Never => "no",
    }
}
