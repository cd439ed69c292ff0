//! Bundle extraction and the rename-based atomic swap.
//!
//! Updates never extract into the canonical workdir. The new version is
//! staged into a `<name>.new` sibling; the swap is two renames
//! (`workdir → <name>.old`, `<name>.new → workdir`) so the canonical path
//! only ever holds a fully-extracted version — current or previous, never
//! a half-written staging tree.

use std::path::{Path, PathBuf};

use tracing::debug;

use orama_core::{ContentStore, Error, Result, paths};

/// Fetch a cid and extract the gzipped tarball into `dest`.
pub async fn fetch_and_extract(content: &dyn ContentStore, cid: &str, dest: &Path) -> Result<()> {
    let data = content.get(cid).await?;
    extract_archive(data, dest.to_path_buf()).await?;
    debug!(%cid, dest = %dest.display(), "bundle extracted");
    Ok(())
}

/// Fetch a cid and extract it into the staging sibling of `workdir`,
/// replacing any stale staging tree from an interrupted update.
pub async fn stage_update(content: &dyn ContentStore, cid: &str, workdir: &Path) -> Result<()> {
    let staging = paths::staging_dir(workdir);
    remove_if_present(&staging).await?;
    tokio::fs::create_dir_all(&staging).await?;
    match fetch_and_extract(content, cid, &staging).await {
        Ok(()) => Ok(()),
        Err(e) => {
            // Failed staging never reaches the canonical path.
            let _ = tokio::fs::remove_dir_all(&staging).await;
            Err(e)
        }
    }
}

/// Swap the staged version in: current becomes `<name>.old`, staging
/// becomes the canonical workdir.
pub async fn swap_in(workdir: &Path) -> Result<()> {
    let staging = paths::staging_dir(workdir);
    let backup = paths::backup_dir(workdir);

    remove_if_present(&backup).await?;
    if tokio::fs::try_exists(workdir).await.unwrap_or(false) {
        tokio::fs::rename(workdir, &backup).await?;
    }
    tokio::fs::rename(&staging, workdir).await.map_err(|e| {
        Error::internal(format!(
            "failed to move staged bundle into {}: {e}",
            workdir.display()
        ))
    })?;
    debug!(workdir = %workdir.display(), "new version swapped in");
    Ok(())
}

/// Undo a swap after a failed restart: drop the bad current version and
/// rename-restore the backup.
pub async fn rollback_swap(workdir: &Path) -> Result<()> {
    let backup = paths::backup_dir(workdir);
    if !tokio::fs::try_exists(&backup).await.unwrap_or(false) {
        return Ok(());
    }
    remove_if_present(workdir).await?;
    tokio::fs::rename(&backup, workdir).await?;
    debug!(workdir = %workdir.display(), "previous version restored");
    Ok(())
}

/// Remove staging and backup siblings once an update settles.
pub async fn clear_transients(workdir: &Path) -> Result<()> {
    remove_if_present(&paths::staging_dir(workdir)).await?;
    remove_if_present(&paths::backup_dir(workdir)).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Unpack a gzipped tarball into `dest`.
pub async fn extract_archive(data: Vec<u8>, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dest)?;
        let decoder = flate2::read::GzDecoder::new(data.as_slice());
        let mut archive = tar::Archive::new(decoder);
        archive
            .unpack(&dest)
            .map_err(|e| Error::internal(format!("failed to extract into {}: {e}", dest.display())))
    })
    .await
    .map_err(|e| Error::internal(format!("extraction task failed: {e}")))?
}

/// Build a gzipped tarball from file name/content pairs (test fixture
/// helper, also used by the daemon's bundle intake).
pub fn archive_from_files(files: &[(&str, &str)]) -> Result<Vec<u8>> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .map_err(|e| Error::internal(format!("failed to append {name}: {e}")))?;
    }
    let encoder = builder
        .into_inner()
        .map_err(|e| Error::internal(format!("failed to finish archive: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::internal(format!("failed to finish gzip stream: {e}")))
}
