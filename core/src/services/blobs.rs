use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::backend::{BackendResult, BlobStore};
use crate::error::BackendError;

/// Blob store on the local disk. Content lives in a content-addressed
/// `objects/` tree; every logical upload path points at one object.
#[derive(Debug, Clone)]
pub struct DiskBlobStore {
    base: PathBuf,
}

impl DiskBlobStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.base.join("objects").join(&hash[..2]).join(hash)
    }

    fn link_path(&self, path: &str) -> BackendResult<PathBuf> {
        let rel = Path::new(path);
        let valid = !path.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(BackendError::Rejected(format!("invalid blob path '{path}'")));
        }
        Ok(self.base.join("paths").join(rel))
    }

    /// Object file currently stored under a logical path.
    pub async fn resolve(&self, path: &str) -> BackendResult<PathBuf> {
        let link = self.link_path(path)?;
        let contents = fs::read(&link)
            .await
            .map_err(|_| BackendError::NotFound(format!("blob '{path}'")))?;
        let hash = std::str::from_utf8(&contents)
            .map(str::trim)
            .ok()
            .filter(|h| is_digest(h))
            .ok_or_else(|| BackendError::NotFound(format!("blob '{path}' has a corrupt link")))?;
        Ok(self.object_path(hash))
    }
}

/// Lowercase hex SHA-256 digest.
fn is_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn io_err(e: std::io::Error) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn upload(&self, path: &str, data: Bytes) -> BackendResult<String> {
        let link = self.link_path(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&data);
        let hash = format!("{:x}", hasher.finalize());
        let object = self.object_path(&hash);
        if let Some(dir) = object.parent() {
            fs::create_dir_all(dir).await.map_err(io_err)?;
        }
        if fs::metadata(&object).await.is_err() {
            fs::write(&object, &data).await.map_err(io_err)?;
        }
        if let Some(dir) = link.parent() {
            fs::create_dir_all(dir).await.map_err(io_err)?;
        }
        // write then rename so readers never see a partial link
        let staged = link.with_extension("link-tmp");
        fs::write(&staged, &hash).await.map_err(io_err)?;
        fs::rename(&staged, &link).await.map_err(io_err)?;
        debug!(path, %hash, size = data.len(), "stored blob");
        Ok(format!("file://{}", object.display()))
    }
}
