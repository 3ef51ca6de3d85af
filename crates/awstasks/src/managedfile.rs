//! Files written to a state store: manifests, node configuration, discovery documents

use fi::featureflag::TERRAFORM_MANAGED_FILES;
use fi::{Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Outputs, Resource, RunContext, TaskError, TerraformTarget};
use serde::Serialize;
use tracing::debug;
use vfs_store::VfsPath;

use crate::util::task_identity;

/// An object at a stable location below a store base
#[derive(Debug, Clone, Serialize)]
pub struct ManagedFile {
    pub name: String,
    /// Store URI; the cluster config base when unset
    pub base: Option<String>,
    pub location: String,
    pub contents: Resource,
    pub public: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl ManagedFile {
    pub fn new(name: impl Into<String>, location: impl Into<String>, contents: Resource) -> Self {
        Self {
            name: name.into(),
            base: None,
            location: location.into(),
            contents,
            public: false,
            lifecycle: Lifecycle::Sync,
        }
    }

    /// Resolved location of the file
    pub fn path(&self, ctx: &RunContext) -> Result<VfsPath, TaskError> {
        let base = match &self.base {
            Some(uri) => ctx.resolve_location(uri)?,
            None => ctx.config_base.clone(),
        };
        Ok(base.join(&self.location))
    }

    fn bytes(&self) -> Result<&[u8], TaskError> {
        self.contents
            .as_bytes()
            .ok_or_else(|| TaskError::Invalid(format!("contents of {} have not been materialized", self.name)))
    }

    async fn write(&self, ctx: &RunContext) -> Result<Outputs, TaskError> {
        let path = self.path(ctx)?;
        path.write(self.bytes()?, self.public).await?;
        debug!(file = %path.uri(), public = self.public, "Wrote managed file");
        Ok(Outputs::new())
    }
}

/// Bucket and key of an `s3://bucket/key` location
fn s3_location(uri: &str) -> Option<(&str, &str)> {
    uri.strip_prefix("s3://")?.split_once('/')
}

#[async_trait::async_trait]
impl CloudupTask for ManagedFile {
    const KIND: &'static str = "ManagedFile";

    task_identity!();

    fn check_existing(&self) -> bool {
        true
    }

    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        Ok(ManagedFile {
            contents: self.contents.materialize(ctx).await?,
            ..self.clone()
        })
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(data) = self.path(ctx)?.read().await? else {
            return Ok(None);
        };
        Ok(Some(ManagedFile {
            contents: Resource::from_bytes(data),
            ..self.clone()
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        self.write(ctx).await
    }

    /// S3 objects become `aws_s3_object` resources; other stores are written directly.
    /// Nothing is rendered when the `TerraformManagedFiles` flag is off.
    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        if !ctx.features.enabled(TERRAFORM_MANAGED_FILES) {
            debug!(file = %self.name, "Terraform managed files disabled, skipping");
            return Ok(Outputs::new());
        }
        let path = self.path(ctx)?;
        let Some((bucket, key)) = s3_location(path.uri()) else {
            return self.write(ctx).await;
        };
        let content = tf.add_file("aws_s3_object", &self.name, "content", self.bytes()?);
        tf.add_resource(
            "aws_s3_object",
            &self.name,
            HclBody::new()
                .attr("bucket", bucket.to_string())
                .attr("key", key.to_string())
                .attr("content", content)
                .opt_attr("acl", self.public.then_some("public-read"))
                .attr("server_side_encryption", "AES256"),
        )?;
        Ok(Outputs::new())
    }

    async fn render_cloudformation(&self, ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        self.write(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_location() {
        assert_eq!(
            s3_location("s3://state/example.com/igconfig/node/nodes/nodeupconfig.yaml"),
            Some(("state", "example.com/igconfig/node/nodes/nodeupconfig.yaml"))
        );
        assert_eq!(s3_location("memfs://state/example.com"), None);
    }
}
