//! Filesystem layout for deployment working directories.
//!
//! Each node owns `<data_root>/deployments/<namespace>/<name>` exclusively.
//! During an update the staged extraction lives in a `<name>.new` sibling
//! and the previous version in `<name>.old`; both are removed once the
//! update settles.

use std::path::{Path, PathBuf};

/// Canonical working directory for a deployment on this node.
pub fn deployment_dir(data_root: &Path, namespace: &str, name: &str) -> PathBuf {
    data_root.join("deployments").join(namespace).join(name)
}

/// Sibling staging directory used while extracting a new version.
pub fn staging_dir(workdir: &Path) -> PathBuf {
    sibling(workdir, "new")
}

/// Sibling backup directory holding the previous version during a swap.
pub fn backup_dir(workdir: &Path) -> PathBuf {
    sibling(workdir, "old")
}

fn sibling(workdir: &Path, suffix: &str) -> PathBuf {
    let name = workdir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    workdir.with_file_name(format!("{name}.{suffix}"))
}
