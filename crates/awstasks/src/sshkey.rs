//! EC2 key pairs for SSH access

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cloud_client::ResourceKind;
use fi::{Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Outputs, RunContext, TaskError, TerraformTarget};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::util::{Tags, attributes, cf_id_output, cf_tags, id_output, task_identity, tf_tags};

/// SHA-256 fingerprint of an OpenSSH public key, as colon separated hex pairs
///
/// Only the base64 key blob (second field of the authorized_keys line) is hashed.
pub fn compute_fingerprint(public_key: &str) -> Result<String, TaskError> {
    let blob = public_key
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| TaskError::Invalid("SSH public key is not in authorized_keys format".to_string()))?;
    let der = STANDARD
        .decode(blob)
        .map_err(|e| TaskError::Invalid(format!("SSH public key is not valid base64: {e}")))?;
    let digest = Sha256::digest(&der);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":"))
}

/// An EC2 key pair imported from a public key
#[derive(Debug, Clone, Serialize)]
pub struct SshKey {
    pub name: String,
    #[serde(skip)]
    pub public_key: String,
    pub key_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl SshKey {
    pub fn new(name: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            public_key: public_key.into(),
            key_fingerprint: None,
            tags: Tags::new(),
            lifecycle: Lifecycle::Sync,
        }
    }
}

#[async_trait::async_trait]
impl CloudupTask for SshKey {
    const KIND: &'static str = "SSHKey";

    task_identity!();

    async fn normalize(&self, _ctx: &RunContext) -> Result<Self, TaskError> {
        Ok(SshKey {
            key_fingerprint: Some(compute_fingerprint(&self.public_key)?),
            ..self.clone()
        })
    }

    fn outputs(&self) -> Outputs {
        id_output(self.name.clone())
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = ctx.cloud.get(ResourceKind::KeyPair, &self.name).await? else {
            return Ok(None);
        };
        Ok(Some(SshKey {
            name: self.name.clone(),
            public_key: self.public_key.clone(),
            key_fingerprint: o.attr_str("key_fingerprint"),
            tags: o.tags.clone(),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        changes.check_immutable(&["key_fingerprint"])
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        match actual {
            None => {
                let attrs = attributes([
                    ("name", json!(self.name)),
                    ("public_key_material", json!(self.public_key)),
                    ("key_fingerprint", json!(self.key_fingerprint)),
                ]);
                ctx.cloud.create(ResourceKind::KeyPair, attrs, self.tags.clone()).await?;
            }
            Some(_) if changes.contains("tags") => {
                ctx.cloud.set_tags(ResourceKind::KeyPair, &self.name, &self.tags).await?;
            }
            Some(_) => {}
        }
        Ok(id_output(self.name.clone()))
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let public_key = tf.add_file("aws_key_pair", &self.name, "public_key", self.public_key.as_bytes());
        tf.add_resource(
            "aws_key_pair",
            &self.name,
            HclBody::new()
                .attr("key_name", self.name.clone())
                .attr("public_key", public_key)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference("aws_key_pair", &self.name, "id")))
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::EC2::KeyPair";
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "KeyName": self.name,
                "PublicKeyMaterial": self.public_key.trim(),
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(cf_id_output(TYPE, &self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIDiuKnN0WXZ3bd9w5Q8+JfhPb9U1OjpUSBVo1aTz4+4D admin@example";

    #[test]
    fn test_fingerprint_format() {
        let fp = compute_fingerprint(KEY).unwrap();
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert_eq!(fp.split(':').count(), 32);
        assert_eq!(fp, compute_fingerprint(&format!("{KEY}\n")).unwrap());
    }

    #[test]
    fn test_fingerprint_rejects_garbage() {
        assert!(compute_fingerprint("not-a-key").is_err());
        assert!(compute_fingerprint("ssh-rsa !!!").is_err());
    }
}
