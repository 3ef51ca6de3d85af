//! Copies of the keystore and secret store at a second location

use std::collections::BTreeSet;

use fi::{Changes, CloudFormationTarget, CloudupTask, Lifecycle, Outputs, RunContext, TaskError, TaskKey, TaskMap, TerraformTarget};
use serde::Serialize;
use tracing::info;
use vfs_store::{Keystore, SecretStore};

use crate::keypair::Keypair;
use crate::secret::Secret;
use crate::util::task_identity;

fn keys_of<T: CloudupTask>(tasks: &TaskMap) -> Vec<TaskKey> {
    tasks.of_kind::<T>().into_iter().map(|t| TaskKey::new(T::KIND, t.name())).collect()
}

/// Mirrors every secret to `mirror_path`
#[derive(Debug, Clone, Serialize)]
pub struct MirrorSecrets {
    pub name: String,
    pub mirror_path: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl MirrorSecrets {
    async fn mirror(&self, ctx: &RunContext) -> Result<Outputs, TaskError> {
        let dest = ctx.resolve_location(&self.mirror_path)?;
        let copied = ctx.secrets.mirror_to(&dest).await?;
        info!(mirror = %self.mirror_path, copied, "Mirrored secrets");
        Ok(Outputs::new())
    }
}

#[async_trait::async_trait]
impl CloudupTask for MirrorSecrets {
    const KIND: &'static str = "MirrorSecrets";

    task_identity!();

    fn dependencies(&self, tasks: &TaskMap) -> Vec<TaskKey> {
        keys_of::<Secret>(tasks)
    }

    fn check_existing(&self) -> bool {
        true
    }

    /// Found when the mirror holds every secret with the same value
    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let dest = SecretStore::new(&ctx.resolve_location(&self.mirror_path)?);
        for name in ctx.secrets.list_secrets().await? {
            let source = ctx.secrets.find_secret(&name).await?;
            if dest.find_secret(&name).await? != source {
                return Ok(None);
            }
        }
        Ok(Some(self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        self.mirror(ctx).await
    }

    async fn render_terraform(&self, ctx: &RunContext, _tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        self.mirror(ctx).await
    }

    async fn render_cloudformation(&self, ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        self.mirror(ctx).await
    }
}

/// Mirrors every keyset to `mirror_path`
#[derive(Debug, Clone, Serialize)]
pub struct MirrorKeystore {
    pub name: String,
    pub mirror_path: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl MirrorKeystore {
    async fn mirror(&self, ctx: &RunContext) -> Result<Outputs, TaskError> {
        let dest = ctx.resolve_location(&self.mirror_path)?;
        let copied = ctx.keystore.mirror_to(&dest).await?;
        info!(mirror = %self.mirror_path, copied, "Mirrored keystore");
        Ok(Outputs::new())
    }
}

#[async_trait::async_trait]
impl CloudupTask for MirrorKeystore {
    const KIND: &'static str = "MirrorKeystore";

    task_identity!();

    fn dependencies(&self, tasks: &TaskMap) -> Vec<TaskKey> {
        keys_of::<Keypair>(tasks)
    }

    fn check_existing(&self) -> bool {
        true
    }

    /// Found when the mirror holds every keyset with the same items and primary
    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let dest = Keystore::new(&ctx.resolve_location(&self.mirror_path)?);
        let mirrored: BTreeSet<String> = dest.list_keysets().await?.into_iter().collect();
        for name in ctx.keystore.list_keysets().await? {
            if !mirrored.contains(&name) {
                return Ok(None);
            }
            let (Some(source), Some(copy)) = (ctx.keystore.find_keyset(&name).await?, dest.find_keyset(&name).await?)
            else {
                return Ok(None);
            };
            if source.primary_id != copy.primary_id || source.items != copy.items {
                return Ok(None);
            }
        }
        Ok(Some(self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        self.mirror(ctx).await
    }

    async fn render_terraform(&self, ctx: &RunContext, _tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        self.mirror(ctx).await
    }

    async fn render_cloudformation(&self, ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        self.mirror(ctx).await
    }
}
