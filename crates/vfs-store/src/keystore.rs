//! Keystore
//!
//! Each keyset lives at `pki/private/<name>/keyset.yaml` with a public copy
//! (certificates only) at `pki/issued/<name>/keyset.yaml`. Older state keeps
//! one `pki/issued/<name>/<id>.crt` and `pki/private/<name>/<id>.key` per
//! item; such keysets load with `legacy` set so callers can rewrite them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::store::VfsPath;

/// One certificate/key pair in a keyset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetItem {
    /// Item id: the certificate serial in decimal
    pub id: String,
    /// PEM certificate
    pub certificate: String,
    /// PEM private key (absent for certificate-only items)
    pub private_key: Option<String>,
    /// When set, the item is no longer trusted
    pub distrust_timestamp: Option<DateTime<Utc>>,
}

/// Versioned keypair items for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyset {
    /// Keyset name (`kubernetes-ca`, `kubelet`, …)
    pub name: String,
    /// Id of the primary item
    pub primary_id: String,
    /// Items in insertion order
    pub items: Vec<KeysetItem>,
    /// Loaded from the per-file legacy layout
    pub legacy: bool,
}

impl Keyset {
    /// The primary item
    pub fn primary(&self) -> Option<&KeysetItem> {
        self.items.iter().find(|i| i.id == self.primary_id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeysetDocument {
    api_version: String,
    kind: String,
    metadata: KeysetMetadata,
    spec: KeysetSpec,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeysetMetadata {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeysetSpec {
    #[serde(rename = "type")]
    keyset_type: String,
    primary_id: String,
    #[serde(default)]
    keys: Vec<KeyDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyDocument {
    id: String,
    public_material: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_material: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    distrust_timestamp: Option<DateTime<Utc>>,
}

fn to_document(keyset: &Keyset, include_private: bool) -> KeysetDocument {
    KeysetDocument {
        api_version: "kops.k8s.io/v1alpha2".to_string(),
        kind: "Keyset".to_string(),
        metadata: KeysetMetadata {
            name: keyset.name.clone(),
        },
        spec: KeysetSpec {
            keyset_type: "Keypair".to_string(),
            primary_id: keyset.primary_id.clone(),
            keys: keyset
                .items
                .iter()
                .map(|item| KeyDocument {
                    id: item.id.clone(),
                    public_material: item.certificate.clone(),
                    private_material: if include_private {
                        item.private_key.clone()
                    } else {
                        None
                    },
                    distrust_timestamp: item.distrust_timestamp,
                })
                .collect(),
        },
    }
}

/// Compares decimal serials numerically (longer is larger)
fn serial_order(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Keystore rooted at `<base>/pki`
#[derive(Debug, Clone)]
pub struct Keystore {
    base: VfsPath,
    write_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Keystore {
    /// Create a keystore below `base` (normally the cluster config base)
    pub fn new(base: &VfsPath) -> Self {
        Self {
            base: base.join("pki"),
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Location of the keystore
    pub fn location(&self) -> &VfsPath {
        &self.base
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Load a keyset, falling back to the legacy per-file layout
    pub async fn find_keyset(&self, name: &str) -> Result<Option<Keyset>, StoreError> {
        let path = self.base.join(&format!("private/{name}/keyset.yaml"));
        if let Some(raw) = path.read().await? {
            let doc: KeysetDocument = serde_yaml::from_slice(&raw)?;
            let keyset = Keyset {
                name: name.to_string(),
                primary_id: doc.spec.primary_id,
                items: doc
                    .spec
                    .keys
                    .into_iter()
                    .map(|k| KeysetItem {
                        id: k.id,
                        certificate: k.public_material,
                        private_key: k.private_material,
                        distrust_timestamp: k.distrust_timestamp,
                    })
                    .collect(),
                legacy: false,
            };
            if keyset.primary().is_none() {
                return Err(StoreError::Keyset {
                    name: name.to_string(),
                    message: format!("primary id {} not among items", keyset.primary_id),
                });
            }
            return Ok(Some(keyset));
        }
        self.find_legacy_keyset(name).await
    }

    async fn find_legacy_keyset(&self, name: &str) -> Result<Option<Keyset>, StoreError> {
        let issued = self.base.join(&format!("issued/{name}"));
        let private = self.base.join(&format!("private/{name}"));
        let mut ids: Vec<String> = issued
            .list()
            .await?
            .into_iter()
            .filter_map(|f| f.strip_suffix(".crt").map(ToString::to_string))
            .filter(|id| !id.contains('/'))
            .collect();
        if ids.is_empty() {
            return Ok(None);
        }
        ids.sort_by(|a, b| serial_order(a, b));

        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            let cert = issued.join(&format!("{id}.crt")).read().await?.unwrap_or_default();
            let key = private.join(&format!("{id}.key")).read().await?;
            items.push(KeysetItem {
                id: id.clone(),
                certificate: String::from_utf8_lossy(&cert).to_string(),
                private_key: key.map(|k| String::from_utf8_lossy(&k).to_string()),
                distrust_timestamp: None,
            });
        }
        debug!(keyset = name, items = items.len(), "Loaded keyset from legacy layout");
        let primary_id = ids.last().cloned().unwrap_or_default();
        Ok(Some(Keyset {
            name: name.to_string(),
            primary_id,
            items,
            legacy: true,
        }))
    }

    /// Persist a keyset in the current layout
    ///
    /// Writes to the same keyset are serialised.
    pub async fn store_keyset(&self, keyset: &Keyset) -> Result<(), StoreError> {
        if keyset.primary().is_none() {
            return Err(StoreError::Keyset {
                name: keyset.name.clone(),
                message: format!("primary id {} not among items", keyset.primary_id),
            });
        }
        let lock = self.lock_for(&keyset.name);
        let _guard = lock.lock().await;

        let private = serde_yaml::to_string(&to_document(keyset, true))?;
        let public = serde_yaml::to_string(&to_document(keyset, false))?;
        self.base
            .join(&format!("private/{}/keyset.yaml", keyset.name))
            .write(private.as_bytes(), false)
            .await?;
        self.base
            .join(&format!("issued/{}/keyset.yaml", keyset.name))
            .write(public.as_bytes(), false)
            .await?;
        debug!(keyset = %keyset.name, primary = %keyset.primary_id, "Stored keyset");
        Ok(())
    }

    /// Names of all keysets, in either layout
    pub async fn list_keysets(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .base
            .join("issued")
            .list()
            .await?
            .into_iter()
            .filter_map(|p| p.split_once('/').map(|(name, _)| name.to_string()))
            .chain(
                self.base
                    .join("private")
                    .list()
                    .await?
                    .into_iter()
                    .filter_map(|p| p.split_once('/').map(|(name, _)| name.to_string())),
            )
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Copy every keyset to another location in the current layout
    pub async fn mirror_to(&self, dest: &VfsPath) -> Result<usize, StoreError> {
        let dest = Keystore::new(dest);
        let mut copied = 0;
        for name in self.list_keysets().await? {
            if let Some(mut keyset) = self.find_keyset(&name).await? {
                keyset.legacy = false;
                dest.store_keyset(&keyset).await?;
                copied += 1;
            }
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_order_is_numeric() {
        let mut ids = vec!["100".to_string(), "99".to_string(), "1000".to_string()];
        ids.sort_by(|a, b| serial_order(a, b));
        assert_eq!(ids, vec!["99", "100", "1000"]);
    }
}
