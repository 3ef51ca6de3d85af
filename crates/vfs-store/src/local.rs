//! Local filesystem blob store
//!
//! Writes go through a temporary file in the same directory followed by a
//! rename, so readers never observe a partially written blob.

use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::StoreError;
use crate::store::BlobStore;

/// Blob store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn relative(&self, full: &Path) -> Option<String> {
        full.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalStore {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.full_path(path);
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(full.display().to_string(), e)),
        }
    }

    async fn write(&self, path: &str, data: &[u8], _public: bool) -> Result<(), StoreError> {
        let full = self.full_path(path);
        let parent = full
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StoreError::io(parent.display().to_string(), e))?;

        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| StoreError::io(tmp.display().to_string(), e))?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| StoreError::io(full.display().to_string(), e))?;
        trace!(path = %full.display(), bytes = data.len(), "Wrote blob");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(dir.display().to_string(), e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(dir.display().to_string(), e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(path.display().to_string(), e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(rel) = self.relative(&path) {
                    let hidden = rel.rsplit('/').next().is_some_and(|n| n.starts_with('.'));
                    if !hidden && rel.starts_with(prefix) {
                        out.push(rel);
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let full = self.full_path(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(full.display().to_string(), e)),
        }
    }
}
