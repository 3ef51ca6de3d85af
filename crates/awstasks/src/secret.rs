//! Generated secrets kept in the cluster secret store

use fi::{Changes, CloudFormationTarget, CloudupTask, Lifecycle, Outputs, RunContext, TaskError, TerraformTarget};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use tracing::info;
use vfs_store::Secret as StoredSecret;

use crate::util::task_identity;

/// Length of generated secrets
pub const SECRET_LENGTH: usize = 32;

/// Random alphanumeric token
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// A secret created once and never rotated
#[derive(Debug, Clone, Serialize)]
pub struct Secret {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl Secret {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Sync,
        }
    }

    async fn create(&self, ctx: &RunContext) -> Result<Outputs, TaskError> {
        let secret = StoredSecret {
            data: generate_token().into_bytes(),
        };
        ctx.secrets.put_secret(&self.name, &secret).await?;
        info!(secret = %self.name, "Created secret");
        Ok(Outputs::new())
    }
}

#[async_trait::async_trait]
impl CloudupTask for Secret {
    const KIND: &'static str = "Secret";

    task_identity!();

    fn check_existing(&self) -> bool {
        true
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        Ok(ctx.secrets.find_secret(&self.name).await?.map(|_| self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        self.create(ctx).await
    }

    async fn render_terraform(&self, ctx: &RunContext, _tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        self.create(ctx).await
    }

    async fn render_cloudformation(&self, ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        self.create(ctx).await
    }
}
