//! EC2 key pair for the operator's SSH public key

use awstasks::SshKey;
use awstasks::sshkey::compute_fingerprint;
use fi::ModelBuilderContext;
use tracing::debug;

use crate::ModelBuilder;
use crate::context::ModelContext;
use crate::error::ModelError;

/// Imports the supplied public key unless the cluster names an existing key pair
#[derive(Debug, Default)]
pub struct SshKeyBuilder;

impl SshKeyBuilder {
    /// `kubernetes.<cluster>-<fingerprint>`, or the configured key pair name
    pub fn key_name(model: &ModelContext) -> Result<Option<String>, ModelError> {
        if let Some(name) = &model.cluster.spec.ssh_key_name {
            return Ok((!name.is_empty()).then(|| name.clone()));
        }
        let Some(key) = model.ssh_public_keys.first() else {
            return Ok(None);
        };
        let fingerprint = compute_fingerprint(key).map_err(|source| ModelError::Task {
            what: "SSH public key".to_string(),
            source,
        })?;
        Ok(Some(format!("kubernetes.{}-{fingerprint}", model.cluster_name())))
    }

    /// The key pair is imported by this build rather than referenced by name
    pub fn is_managed(model: &ModelContext) -> bool {
        model.cluster.spec.ssh_key_name.is_none() && !model.ssh_public_keys.is_empty()
    }
}

impl ModelBuilder for SshKeyBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        if model.ssh_public_keys.len() > 1 {
            return Err(ModelError::invalid(
                "sshPublicKeys",
                "exactly one SSH public key can be specified when running with AWS",
            ));
        }
        if !Self::is_managed(model) {
            debug!("No SSH key to import");
            return Ok(());
        }
        let Some(name) = Self::key_name(model)? else {
            return Ok(());
        };
        let key = &model.ssh_public_keys[0];
        c.add(SshKey {
            tags: model.cloud_tags(&name, false),
            ..SshKey::new(name, key.clone())
        })?;
        Ok(())
    }
}
