//! Secret store
//!
//! Secrets are opaque byte strings kept at `secrets/<name>` as a small JSON
//! document with base64 data.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::VfsPath;

/// A stored secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    /// Raw secret bytes
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct SecretDocument {
    #[serde(rename = "Data")]
    data: String,
}

/// Secret store rooted at `<base>/secrets`
#[derive(Debug, Clone)]
pub struct SecretStore {
    base: VfsPath,
}

impl SecretStore {
    /// Create a store below `base` (normally the cluster config base)
    pub fn new(base: &VfsPath) -> Self {
        Self {
            base: base.join("secrets"),
        }
    }

    /// Location of the store
    pub fn location(&self) -> &VfsPath {
        &self.base
    }

    /// Find a secret by name
    pub async fn find_secret(&self, name: &str) -> Result<Option<Secret>, StoreError> {
        let path = self.base.join(name);
        let Some(raw) = path.read().await? else {
            return Ok(None);
        };
        let doc: SecretDocument = serde_json::from_slice(&raw)?;
        let data = STANDARD.decode(doc.data).map_err(|e| StoreError::Malformed {
            path: path.uri().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(Secret { data }))
    }

    /// Store a secret, replacing any previous value
    pub async fn put_secret(&self, name: &str, secret: &Secret) -> Result<(), StoreError> {
        let doc = SecretDocument {
            data: STANDARD.encode(&secret.data),
        };
        self.base
            .join(name)
            .write(&serde_json::to_vec(&doc)?, false)
            .await
    }

    /// Names of all stored secrets
    pub async fn list_secrets(&self) -> Result<Vec<String>, StoreError> {
        self.base.list().await
    }

    /// Copy every secret to another location, keeping the same layout
    pub async fn mirror_to(&self, dest: &VfsPath) -> Result<usize, StoreError> {
        let dest = SecretStore::new(dest);
        let mut copied = 0;
        for name in self.list_secrets().await? {
            if let Some(secret) = self.find_secret(&name).await? {
                dest.put_secret(&name, &secret).await?;
                copied += 1;
            }
        }
        Ok(copied)
    }
}
