//! Task registry filled by builders during compilation

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::CompileError;
use crate::key::{Link, TaskKey};
use crate::lifecycle::Lifecycle;
use crate::task::{CloudupTask, Task, TaskMap};

/// Deduplicating sink for tasks
#[derive(Debug, Default)]
pub struct ModelBuilderContext {
    tasks: BTreeMap<TaskKey, Arc<dyn Task>>,
    lifecycle_overrides: BTreeMap<String, Lifecycle>,
}

fn structurally_equal(a: &dyn Task, b: &dyn Task) -> bool {
    match (a.structural_value(), b.structural_value()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl ModelBuilderContext {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry applying per-kind lifecycle overrides to every added task
    pub fn with_lifecycle_overrides(overrides: BTreeMap<String, Lifecycle>) -> Self {
        Self {
            tasks: BTreeMap::new(),
            lifecycle_overrides: overrides,
        }
    }

    fn prepare<T: CloudupTask>(&self, mut task: T) -> T {
        if let Some(lifecycle) = self.lifecycle_overrides.get(T::KIND) {
            task.set_lifecycle(*lifecycle);
        }
        task
    }

    /// Register a task
    ///
    /// Adding a task structurally equal to the registered one is a no-op;
    /// anything else under the same key is a `DuplicateTask`.
    pub fn add<T: CloudupTask>(&mut self, task: T) -> Result<Link<T>, CompileError> {
        let task = self.prepare(task);
        let key = TaskKey::new(T::KIND, task.name());
        let link = task.link();
        if let Some(existing) = self.tasks.get(&key) {
            if structurally_equal(existing.as_ref(), &task) {
                return Ok(link);
            }
            return Err(CompileError::DuplicateTask { key });
        }
        trace!(task = %key, "Added task");
        self.tasks.insert(key, Arc::new(task));
        Ok(link)
    }

    /// Register a task that several builders may emit
    ///
    /// The first registration wins; a later one must be structurally equal or
    /// either side must be shared.
    pub fn ensure<T: CloudupTask>(&mut self, task: T) -> Result<Link<T>, CompileError> {
        let task = self.prepare(task);
        let key = TaskKey::new(T::KIND, task.name());
        let link = task.link();
        match self.tasks.get(&key) {
            Some(existing) => {
                if existing.is_shared() || task.is_shared() || structurally_equal(existing.as_ref(), &task) {
                    Ok(link)
                } else {
                    Err(CompileError::DuplicateTask { key })
                }
            }
            None => {
                self.tasks.insert(key, Arc::new(task));
                Ok(link)
            }
        }
    }

    /// Canonical task for a key
    pub fn lookup(&self, key: &TaskKey) -> Option<&Arc<dyn Task>> {
        self.tasks.get(key)
    }

    /// Canonical typed task for a link
    pub fn find<T: CloudupTask>(&self, link: &Link<T>) -> Option<&T> {
        self.tasks
            .get(&link.key())
            .and_then(|t| t.as_any().downcast_ref::<T>())
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// No tasks registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of the registry
    pub fn into_tasks(self) -> TaskMap {
        TaskMap::from_map(self.tasks)
    }
}
