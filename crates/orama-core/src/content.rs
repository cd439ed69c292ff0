//! Content-addressed blob storage interface.
//!
//! The production deployment uses the fleet-wide content cluster; the core
//! only consumes this interface. [`FsContentStore`] is the embedded backend
//! used by standalone nodes and tests: objects are stored under
//! `<root>/<cid>` with the cid derived from a sha256 digest, and
//! directories are packed as gzipped tarballs before being added.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Blob store consumed by the orchestration core.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Add a blob; returns its content id.
    async fn add(&self, data: &[u8]) -> Result<String>;

    /// Pack a directory and add it; returns the content id of the archive.
    async fn add_directory(&self, path: &Path) -> Result<String>;

    /// Fetch a blob by content id.
    async fn get(&self, cid: &str) -> Result<Vec<u8>>;

    /// Release a blob for garbage collection. Idempotent.
    async fn unpin(&self, cid: &str) -> Result<()>;
}

/// Filesystem-backed content store.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, cid: &str) -> PathBuf {
        self.root.join(cid)
    }
}

/// Content id of a blob: hex sha256 of its bytes.
pub fn cid_for(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn add(&self, data: &[u8]) -> Result<String> {
        let cid = cid_for(data);
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.object_path(&cid);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(cid);
        }
        tokio::fs::write(&path, data).await?;
        debug!(%cid, bytes = data.len(), "blob added");
        Ok(cid)
    }

    async fn add_directory(&self, path: &Path) -> Result<String> {
        let archive = pack_directory(path.to_path_buf()).await?;
        self.add(&archive).await
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>> {
        let path = self.object_path(cid);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("blob {cid} not in store")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unpin(&self, cid: &str) -> Result<()> {
        let path = self.object_path(cid);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Pack a directory into a gzipped tarball with paths relative to its root.
async fn pack_directory(dir: PathBuf) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let buf = Vec::new();
        let encoder = flate2::write::GzEncoder::new(buf, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all(".", &dir)
            .map_err(|e| Error::internal(format!("failed to pack {}: {e}", dir.display())))?;
        let encoder = builder
            .into_inner()
            .map_err(|e| Error::internal(format!("failed to finish archive: {e}")))?;
        encoder
            .finish()
            .map_err(|e| Error::internal(format!("failed to finish gzip stream: {e}")))
    })
    .await
    .map_err(|e| Error::internal(format!("pack task failed: {e}")))?
}
