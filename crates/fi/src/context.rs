//! Per-run execution context

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use cloud_client::CloudApi;
use tokio_util::sync::CancellationToken;
use vfs_store::{Keystore, SecretStore, VfsContext, VfsPath};

use crate::error::TaskError;
use crate::featureflag::FeatureFlags;
use crate::key::{Link, TaskKey};
use crate::target::Target;
use crate::task::{CloudupTask, Outputs, TaskMap};

/// Outputs learned during the run, keyed by task
#[derive(Debug, Default)]
pub struct OutputStore {
    inner: Mutex<BTreeMap<TaskKey, Outputs>>,
}

impl OutputStore {
    /// Merge outputs for a task
    pub fn record(&self, key: &TaskKey, outputs: Outputs) {
        if outputs.is_empty() {
            return;
        }
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .extend(outputs);
    }

    /// One output value
    pub fn get(&self, key: &TaskKey, attribute: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|o| o.get(attribute).cloned())
    }

    /// All outputs of a task
    pub fn all(&self, key: &TaskKey) -> Outputs {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

/// Everything a task can reach while running
pub struct RunContext {
    /// Cluster name
    pub cluster_name: String,
    /// Selected target
    pub target: Target,
    /// Cloud backend
    pub cloud: Arc<dyn CloudApi>,
    /// The compiled registry
    pub tasks: Arc<TaskMap>,
    /// Outputs recorded so far
    pub outputs: OutputStore,
    /// Cluster config base
    pub config_base: VfsPath,
    /// Keystore under the config base
    pub keystore: Keystore,
    /// Secret store under the config base
    pub secrets: SecretStore,
    /// Resolver for other store locations
    pub vfs: VfsContext,
    /// Feature flags for this run
    pub features: FeatureFlags,
    /// Cancels the whole run
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("cluster_name", &self.cluster_name)
            .field("target", &self.target)
            .field("region", &self.cloud.region())
            .field("tasks", &self.tasks.len())
            .field("config_base", &self.config_base)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Create a context
    ///
    /// # Arguments
    ///
    /// * `cluster_name` - Cluster name
    /// * `target` - Render target
    /// * `cloud` - Cloud backend
    /// * `tasks` - Compiled registry
    /// * `config_base` - Location of cluster state
    /// * `vfs` - Resolver for other locations (discovery and backup stores)
    /// * `features` - Feature flag snapshot
    pub fn new(
        cluster_name: impl Into<String>,
        target: Target,
        cloud: Arc<dyn CloudApi>,
        tasks: Arc<TaskMap>,
        config_base: VfsPath,
        vfs: VfsContext,
        features: FeatureFlags,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            target,
            cloud,
            tasks,
            outputs: OutputStore::default(),
            keystore: Keystore::new(&config_base),
            secrets: SecretStore::new(&config_base),
            config_base,
            vfs,
            features,
            cancel: CancellationToken::new(),
        }
    }

    /// One output of a task
    ///
    /// Dry runs substitute a placeholder for outputs of resources that would
    /// be created.
    pub fn output(&self, key: &TaskKey, attribute: &str) -> Result<String, TaskError> {
        if let Some(value) = self.outputs.get(key, attribute) {
            return Ok(value);
        }
        if self.target.is_dry_run() {
            return Ok(format!("<{key}.{attribute}>"));
        }
        Err(TaskError::MissingOutput {
            key: key.clone(),
            attribute: attribute.to_string(),
        })
    }

    /// Provider id of a linked task
    pub fn link_id<T: CloudupTask>(&self, link: &Link<T>) -> Result<String, TaskError> {
        self.output(&link.key(), "id")
    }

    /// Provider id of a linked task, when known
    pub fn try_link_id<T: CloudupTask>(&self, link: &Link<T>) -> Option<String> {
        self.outputs.get(&link.key(), "id")
    }

    /// Named output of a linked task
    pub fn link_output<T: CloudupTask>(&self, link: &Link<T>, attribute: &str) -> Result<String, TaskError> {
        self.output(&link.key(), attribute)
    }

    /// Canonical task behind a link
    pub fn task<T: CloudupTask>(&self, link: &Link<T>) -> Result<&T, TaskError> {
        self.tasks
            .get_typed(link)
            .ok_or_else(|| TaskError::NotFound(format!("task {}", link.key())))
    }

    /// Resolve a store URI
    pub fn resolve_location(&self, uri: &str) -> Result<VfsPath, TaskError> {
        Ok(self.vfs.resolve(uri)?)
    }
}
