//! Task traits
//!
//! Concrete task types implement [`CloudupTask`], which is typed and has an
//! associated kind. The registry and executor work with [`Task`] trait
//! objects; a blanket impl bridges the two and carries the default
//! find / diff / check / render pipeline.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::changes::Changes;
use crate::context::RunContext;
use crate::error::TaskError;
use crate::key::{Link, TaskKey};
use crate::lifecycle::Lifecycle;
use crate::target::cloudformation::CloudFormationTarget;
use crate::target::terraform::TerraformTarget;
use crate::target::Target;

/// Named outputs a task records once found or rendered (`id`, `arn`, …)
pub type Outputs = BTreeMap<String, String>;

/// Result of running one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Nothing to do
    Unchanged,
    /// Resource was created (or would be, for dry runs)
    Created,
    /// Resource was updated (or would be, for dry runs)
    Updated,
    /// Render skipped by lifecycle or flag
    Skipped,
}

/// A backend object scheduled for removal
#[async_trait::async_trait]
pub trait Deletion: Send + Sync + fmt::Debug {
    /// Kind of the task that found the object
    fn task_kind(&self) -> &str;

    /// Identity of the object, unique within the kind
    fn item(&self) -> String;

    /// Remove the object
    async fn delete(&self, ctx: &RunContext) -> Result<(), TaskError>;
}

/// A strongly typed task
///
/// Field values are compared through their serialized form: `Link` fields
/// serialize to the target key and `Resource` fields to a content hash, so a
/// diff is a comparison of JSON values. Lifecycle and shared flags are not
/// part of the serialized form.
#[async_trait::async_trait]
pub trait CloudupTask: Serialize + Clone + fmt::Debug + Send + Sync + 'static {
    /// Task kind, the first half of the task key
    const KIND: &'static str;

    /// Task name
    fn name(&self) -> &str;

    /// Lifecycle
    fn lifecycle(&self) -> Lifecycle;

    /// Replace the lifecycle (applied by overrides at registration)
    fn set_lifecycle(&mut self, lifecycle: Lifecycle);

    /// The resource is owned by someone else and is never mutated
    fn is_shared(&self) -> bool {
        false
    }

    /// Link to this task
    fn link(&self) -> Link<Self> {
        Link::new(self.name())
    }

    /// Explicit dependencies beyond links and lazy resources
    fn dependencies(&self, _tasks: &TaskMap) -> Vec<TaskKey> {
        Vec::new()
    }

    /// The task yields addresses once rendered
    fn has_address(&self) -> bool {
        false
    }

    /// The task's addresses are API server endpoints
    fn is_for_api_server(&self) -> bool {
        false
    }

    /// Addresses known after rendering
    async fn find_addresses(&self, _ctx: &RunContext) -> Result<Vec<String>, TaskError> {
        Ok(Vec::new())
    }

    /// Run `find` even for targets that do not inspect existing state
    fn check_existing(&self) -> bool {
        false
    }

    /// Materialise lazy resources and derived fields before diffing
    async fn normalize(&self, _ctx: &RunContext) -> Result<Self, TaskError> {
        Ok(self.clone())
    }

    /// Look the resource up; `None` when it does not exist
    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError>;

    /// Reject changes that cannot be applied
    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<(), TaskError> {
        Ok(())
    }

    /// Whether a create or update should be rendered at all
    fn should_create(&self, _actual: Option<&Self>, _changes: &Changes) -> bool {
        true
    }

    /// Outputs known from a found value
    fn outputs(&self) -> Outputs {
        Outputs::new()
    }

    /// Create or update through the cloud API
    async fn render_direct(
        &self,
        ctx: &RunContext,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<Outputs, TaskError>;

    /// Emit Terraform resources
    async fn render_terraform(&self, _ctx: &RunContext, _tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        Err(TaskError::Unsupported {
            kind: Self::KIND.to_string(),
            target: "terraform".to_string(),
        })
    }

    /// Emit CloudFormation resources
    async fn render_cloudformation(
        &self,
        _ctx: &RunContext,
        _cf: &CloudFormationTarget,
    ) -> Result<Outputs, TaskError> {
        Err(TaskError::Unsupported {
            kind: Self::KIND.to_string(),
            target: "cloudformation".to_string(),
        })
    }

    /// Backend objects owned by the cluster that should no longer exist
    async fn find_deletions(&self, _ctx: &RunContext) -> Result<Vec<Arc<dyn Deletion>>, TaskError> {
        Ok(Vec::new())
    }
}

/// Object-safe task interface used by the registry and executor
#[async_trait::async_trait]
pub trait Task: Send + Sync + fmt::Debug {
    /// Task key
    fn key(&self) -> TaskKey;

    /// Lifecycle
    fn lifecycle(&self) -> Lifecycle;

    /// Shared flag
    fn is_shared(&self) -> bool;

    /// Serialized field values
    fn to_value(&self) -> Result<Value, TaskError>;

    /// Serialized fields plus lifecycle and shared flag
    fn structural_value(&self) -> Result<Value, TaskError> {
        Ok(json!({
            "fields": self.to_value()?,
            "lifecycle": self.lifecycle().to_string(),
            "shared": self.is_shared(),
        }))
    }

    /// Explicit dependencies
    fn dependencies(&self, tasks: &TaskMap) -> Vec<TaskKey>;

    /// The task yields addresses
    fn has_address(&self) -> bool;

    /// The task's addresses are API server endpoints
    fn is_for_api_server(&self) -> bool;

    /// Addresses known after rendering
    async fn find_addresses(&self, ctx: &RunContext) -> Result<Vec<String>, TaskError>;

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;

    /// Run the find / diff / render pipeline
    async fn run(&self, ctx: &RunContext) -> Result<TaskOutcome, TaskError>;

    /// Opt-in deletions
    async fn find_deletions(&self, ctx: &RunContext) -> Result<Vec<Arc<dyn Deletion>>, TaskError>;
}

#[async_trait::async_trait]
impl<T: CloudupTask> Task for T {
    fn key(&self) -> TaskKey {
        TaskKey::new(T::KIND, self.name())
    }

    fn lifecycle(&self) -> Lifecycle {
        CloudupTask::lifecycle(self)
    }

    fn is_shared(&self) -> bool {
        CloudupTask::is_shared(self)
    }

    fn to_value(&self) -> Result<Value, TaskError> {
        Ok(serde_json::to_value(self)?)
    }

    fn dependencies(&self, tasks: &TaskMap) -> Vec<TaskKey> {
        CloudupTask::dependencies(self, tasks)
    }

    fn has_address(&self) -> bool {
        CloudupTask::has_address(self)
    }

    fn is_for_api_server(&self) -> bool {
        CloudupTask::is_for_api_server(self)
    }

    async fn find_addresses(&self, ctx: &RunContext) -> Result<Vec<String>, TaskError> {
        CloudupTask::find_addresses(self, ctx).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn run(&self, ctx: &RunContext) -> Result<TaskOutcome, TaskError> {
        run_task(self, ctx).await
    }

    async fn find_deletions(&self, ctx: &RunContext) -> Result<Vec<Arc<dyn Deletion>>, TaskError> {
        CloudupTask::find_deletions(self, ctx).await
    }
}

/// Default delta-run pipeline
async fn run_task<T: CloudupTask>(task: &T, ctx: &RunContext) -> Result<TaskOutcome, TaskError> {
    let key = TaskKey::new(T::KIND, task.name());
    let expected = task.normalize(ctx).await?;
    let check_existing = ctx.target.checks_existing() || expected.check_existing();

    let actual = if check_existing {
        expected.find(ctx).await?
    } else {
        None
    };
    if let Some(actual) = &actual {
        ctx.outputs.record(&key, actual.outputs());
    }

    let expected_value = serde_json::to_value(&expected)?;
    let actual_value = actual.as_ref().map(serde_json::to_value).transpose()?;
    let changes = Changes::compute(&expected_value, actual_value.as_ref());

    let lifecycle = CloudupTask::lifecycle(&expected);
    match lifecycle {
        Lifecycle::Ignore => {
            debug!(task = %key, "Lifecycle Ignore, skipping render");
            return Ok(TaskOutcome::Skipped);
        }
        Lifecycle::ExistsAndValidates if check_existing => {
            if actual.is_none() {
                return Err(TaskError::NotFound(key.to_string()));
            }
            if !changes.is_empty() {
                return Err(TaskError::ValidationMismatch(changes.to_string()));
            }
            return Ok(TaskOutcome::Unchanged);
        }
        _ => {}
    }

    if CloudupTask::is_shared(&expected) {
        if !check_existing {
            ctx.outputs.record(&key, expected.outputs());
            return Ok(TaskOutcome::Unchanged);
        }
        if actual.is_none() {
            return Err(TaskError::NotFound(format!("shared resource {key}")));
        }
        if !changes.is_empty() {
            return Err(TaskError::Conflict(format!("{key}: {changes}")));
        }
        return Ok(TaskOutcome::Unchanged);
    }

    if lifecycle == Lifecycle::ExistsAndWarnIfChanges && actual.is_some() && !changes.is_empty() {
        warn!(task = %key, changes = %changes, "Resource differs, not changing it");
        return Ok(TaskOutcome::Unchanged);
    }

    expected.check_changes(actual.as_ref(), &changes)?;

    if actual.is_some() && changes.is_empty() {
        return Ok(TaskOutcome::Unchanged);
    }
    if !expected.should_create(actual.as_ref(), &changes) {
        debug!(task = %key, "Task declined to render");
        return Ok(TaskOutcome::Unchanged);
    }

    let outcome = if actual.is_some() {
        TaskOutcome::Updated
    } else {
        TaskOutcome::Created
    };

    let outputs = match &ctx.target {
        Target::Direct => {
            info!(task = %key, ?outcome, changes = %changes, "Rendering");
            expected.render_direct(ctx, actual.as_ref(), &changes).await?
        }
        Target::Terraform(tf) => expected.render_terraform(ctx, tf).await?,
        Target::CloudFormation(cf) => expected.render_cloudformation(ctx, cf).await?,
        Target::DryRun(report) => {
            report.record(&key, actual.is_none(), &changes);
            expected.outputs()
        }
    };
    ctx.outputs.record(&key, outputs);
    Ok(outcome)
}

/// Read-only snapshot of the registry used during execution
#[derive(Debug, Clone, Default)]
pub struct TaskMap {
    tasks: BTreeMap<TaskKey, Arc<dyn Task>>,
}

impl TaskMap {
    pub(crate) fn from_map(tasks: BTreeMap<TaskKey, Arc<dyn Task>>) -> Self {
        Self { tasks }
    }

    /// Task by key
    pub fn get(&self, key: &TaskKey) -> Option<&Arc<dyn Task>> {
        self.tasks.get(key)
    }

    /// Typed task by link
    pub fn get_typed<T: CloudupTask>(&self, link: &Link<T>) -> Option<&T> {
        self.tasks
            .get(&link.key())
            .and_then(|t| t.as_any().downcast_ref::<T>())
    }

    /// Every task of kind `T`
    pub fn of_kind<T: CloudupTask>(&self) -> Vec<&T> {
        self.tasks
            .values()
            .filter_map(|t| t.as_any().downcast_ref::<T>())
            .collect()
    }

    /// Tasks in key order
    pub fn iter(&self) -> impl Iterator<Item = (&TaskKey, &Arc<dyn Task>)> {
        self.tasks.iter()
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.tasks.keys()
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Registry is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Keys of every task whose addresses are API server endpoints
    pub fn api_server_address_sources(&self) -> Vec<TaskKey> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.has_address() && t.is_for_api_server())
            .map(|(k, _)| k.clone())
            .collect()
    }
}
