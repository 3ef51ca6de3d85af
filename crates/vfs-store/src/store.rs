//! Blob stores
//!
//! A `BlobStore` is a flat key/value space addressed by `/`-separated paths.
//! `VfsPath` pairs a store with a base path and is what the rest of the
//! workspace passes around as a "location".

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StoreError;
use crate::local::LocalStore;

/// Trait for blob storage backends
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Read a blob; `None` when it does not exist
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or replace a blob
    ///
    /// # Arguments
    ///
    /// * `path` - Blob path
    /// * `data` - Contents
    /// * `public` - Whether the blob should be world-readable
    async fn write(&self, path: &str, data: &[u8], public: bool) -> Result<(), StoreError>;

    /// List blob paths below `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove a blob; removing a missing blob is not an error
    async fn delete(&self, path: &str) -> Result<(), StoreError>;
}

/// In-memory blob store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    public: Arc<Mutex<BTreeSet<String>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the blob was last written as public
    pub fn is_public(&self, path: &str) -> bool {
        self.public
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    /// Every stored path
    pub fn paths(&self) -> Vec<String> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned())
    }

    async fn write(&self, path: &str, data: &[u8], public: bool) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), data.to_vec());
        let mut acl = self.public.lock().unwrap_or_else(PoisonError::into_inner);
        if public {
            acl.insert(path.to_string());
        } else {
            acl.remove(path);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        Ok(())
    }
}

/// A location inside a blob store
#[derive(Clone)]
pub struct VfsPath {
    store: Arc<dyn BlobStore>,
    uri: String,
    path: String,
}

impl fmt::Debug for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl PartialEq for VfsPath {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

fn join_segments(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if base.is_empty() {
        rel.to_string()
    } else if rel.is_empty() {
        base.to_string()
    } else {
        format!("{}/{rel}", base.trim_end_matches('/'))
    }
}

impl VfsPath {
    /// Create a path on a store
    ///
    /// # Arguments
    ///
    /// * `store` - Backing store
    /// * `uri` - Display form (`memfs://…`, `s3://…`, a directory)
    /// * `path` - Key of this location inside the store
    pub fn new(store: Arc<dyn BlobStore>, uri: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            store,
            uri: uri.into(),
            path: path.into(),
        }
    }

    /// Child location
    pub fn join(&self, rel: &str) -> VfsPath {
        VfsPath {
            store: Arc::clone(&self.store),
            uri: join_segments(&self.uri, rel),
            path: join_segments(&self.path, rel),
        }
    }

    /// Display form of the location
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Key inside the backing store
    pub fn key(&self) -> &str {
        &self.path
    }

    /// Backing store
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Read the blob at this location
    pub async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.read(&self.path).await
    }

    /// Write the blob at this location
    pub async fn write(&self, data: &[u8], public: bool) -> Result<(), StoreError> {
        self.store.write(&self.path, data, public).await
    }

    /// Delete the blob at this location
    pub async fn delete(&self) -> Result<(), StoreError> {
        self.store.delete(&self.path).await
    }

    /// List blobs below this location, relative to it
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let prefix = if self.path.is_empty() {
            String::new()
        } else {
            format!("{}/", self.path.trim_end_matches('/'))
        };
        Ok(self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .map(|p| p[prefix.len()..].to_string())
            .collect())
    }
}

/// Maps store URIs to backends
///
/// `memfs://` locations share one in-process store. `file://` and absolute
/// paths are local directories. Other schemes (`s3://`, `gs://`) are emulated
/// as directories below the state root when one is configured.
#[derive(Debug, Clone)]
pub struct VfsContext {
    memfs: MemoryStore,
    state_root: Option<PathBuf>,
}

impl VfsContext {
    /// Create a context
    ///
    /// # Arguments
    ///
    /// * `state_root` - Directory that emulates object-store schemes
    pub fn new(state_root: Option<PathBuf>) -> Self {
        Self {
            memfs: MemoryStore::new(),
            state_root,
        }
    }

    /// The shared in-memory store behind `memfs://`
    pub fn memfs(&self) -> &MemoryStore {
        &self.memfs
    }

    /// Resolve a URI to a location
    pub fn resolve(&self, uri: &str) -> Result<VfsPath, StoreError> {
        if let Some(rest) = uri.strip_prefix("memfs://") {
            return Ok(VfsPath::new(
                Arc::new(self.memfs.clone()),
                uri.trim_end_matches('/'),
                rest.trim_matches('/'),
            ));
        }
        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(VfsPath::new(Arc::new(LocalStore::new(rest)), uri.trim_end_matches('/'), ""));
        }
        if uri.starts_with('/') {
            return Ok(VfsPath::new(Arc::new(LocalStore::new(uri)), uri.trim_end_matches('/'), ""));
        }
        if let Some((scheme, rest)) = uri.split_once("://") {
            let root = self
                .state_root
                .as_ref()
                .ok_or_else(|| StoreError::UnsupportedLocation(uri.to_string()))?;
            let dir = root.join(scheme).join(rest.trim_matches('/'));
            return Ok(VfsPath::new(Arc::new(LocalStore::new(dir)), uri.trim_end_matches('/'), ""));
        }
        Err(StoreError::UnsupportedLocation(uri.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store.write("a/b", b"hello", true).await.unwrap();
        assert_eq!(store.read("a/b").await.unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(store.is_public("a/b"));
        store.write("a/b", b"again", false).await.unwrap();
        assert!(!store.is_public("a/b"));
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/b".to_string()]);
        store.delete("a/b").await.unwrap();
        assert!(store.read("a/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memfs_paths_share_store() {
        let ctx = VfsContext::new(None);
        let base = ctx.resolve("memfs://clusters/example.com").unwrap();
        base.join("pki/private/ca/keyset.yaml")
            .write(b"x", false)
            .await
            .unwrap();
        assert_eq!(base.join("pki").list().await.unwrap(), vec!["private/ca/keyset.yaml".to_string()]);
        assert_eq!(base.join("pki").uri(), "memfs://clusters/example.com/pki");
        assert_eq!(ctx.memfs().paths(), vec!["clusters/example.com/pki/private/ca/keyset.yaml".to_string()]);
    }

    #[test]
    fn test_object_store_requires_state_root() {
        let ctx = VfsContext::new(None);
        assert!(ctx.resolve("s3://bucket/cluster").is_err());
        let ctx = VfsContext::new(Some(PathBuf::from("/tmp/state")));
        assert_eq!(ctx.resolve("s3://bucket/cluster").unwrap().uri(), "s3://bucket/cluster");
    }
}
