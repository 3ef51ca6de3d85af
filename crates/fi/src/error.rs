//! Engine errors and exit codes

use cloud_client::CloudError;
use thiserror::Error;
use vfs_store::StoreError;

use crate::key::TaskKey;

/// Exit code for validation failures
pub const EXIT_VALIDATION: i32 = 2;
/// Exit code for compile failures
pub const EXIT_COMPILE: i32 = 3;
/// Exit code for execution failures
pub const EXIT_EXECUTION: i32 = 4;
/// Exit code for ExistsAndValidates mismatches
pub const EXIT_VALIDATION_MISMATCH: i32 = 5;

/// Errors raised while assembling the task registry and graph
#[derive(Debug, Error)]
pub enum CompileError {
    /// Two builders emitted different tasks under one key
    #[error("duplicate task {key}: an unequal task with this key is already registered")]
    DuplicateTask {
        /// Conflicting key
        key: TaskKey,
    },

    /// A task-valued field names a task that is not registered
    #[error("task {from} field {field} references missing task {to}")]
    MissingReference {
        /// Referencing task
        from: TaskKey,
        /// Field path inside the referencing task
        field: String,
        /// Missing target
        to: TaskKey,
    },

    /// The dependency graph has cycles
    #[error("dependency cycle detected: {}", format_cycles(.cycles))]
    CycleDetected {
        /// Each cycle's member keys, sorted
        cycles: Vec<Vec<TaskKey>>,
    },

    /// Lifecycle override string could not be parsed
    #[error("invalid lifecycle override: {0}")]
    InvalidOverride(String),

    /// A task's fields could not be serialized for reference discovery
    #[error("task {key} could not be serialized: {source}")]
    Serialize {
        /// Offending task
        key: TaskKey,
        /// Underlying failure
        source: TaskError,
    },
}

fn format_cycles(cycles: &[Vec<TaskKey>]) -> String {
    cycles
        .iter()
        .map(|c| {
            c.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl CompileError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        EXIT_COMPILE
    }
}

/// Errors raised by a single task during execution
#[derive(Debug, Error)]
pub enum TaskError {
    /// A field that cannot be changed in place differs
    #[error("field {field} cannot be changed (actual {actual}, expected {expected})")]
    ImmutableFieldChange {
        /// Field path
        field: String,
        /// Value found in the cloud
        actual: String,
        /// Desired value
        expected: String,
    },

    /// Backend call failed
    #[error("backend error: {0}")]
    Cloud(#[from] CloudError),

    /// State store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A resource that must already exist was not found
    #[error("not found: {0}")]
    NotFound(String),

    /// A shared resource differs from the description
    #[error("shared resource differs and will not be modified: {0}")]
    Conflict(String),

    /// An ExistsAndValidates resource differs from the description
    #[error("existing resource does not match: {0}")]
    ValidationMismatch(String),

    /// Keyset could not be read, issued or stored
    #[error("keyset {name}: {message}")]
    Keyset {
        /// Keyset name
        name: String,
        /// What went wrong
        message: String,
    },

    /// An output of another task was needed but has not been recorded
    #[error("output {attribute} of {key} is not available")]
    MissingOutput {
        /// Producing task
        key: TaskKey,
        /// Output name
        attribute: String,
    },

    /// The task kind cannot be rendered by the selected target
    #[error("{kind} cannot be rendered by the {target} target")]
    Unsupported {
        /// Task kind
        kind: String,
        /// Target name
        target: String,
    },

    /// The task description is internally inconsistent
    #[error("invalid task: {0}")]
    Invalid(String),

    /// Rendering output could not be written
    #[error("render error: {0}")]
    Render(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The task panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The run was cancelled before the task started
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Field path associated with the error, when there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            TaskError::ImmutableFieldChange { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Run-level failure returned by the executor
#[derive(Debug, Error)]
pub enum RunError {
    /// One or more tasks failed
    #[error("{} task(s) failed, {} not started:\n{}", .failures.len(), .not_started, format_failures(.failures))]
    Failed {
        /// Failed task keys and their errors, sorted by key
        failures: Vec<(TaskKey, TaskError)>,
        /// Tasks that never started because the run was aborted
        not_started: usize,
    },

    /// The run was cancelled from outside
    #[error("run cancelled")]
    Cancelled,

    /// Writing target output failed after all tasks ran
    #[error("finalising target: {0}")]
    Finish(TaskError),
}

fn format_failures(failures: &[(TaskKey, TaskError)]) -> String {
    failures
        .iter()
        .map(|(key, err)| match err.field() {
            Some(field) => format!("  {key} [{field}]: {err}"),
            None => format!("  {key}: {err}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl RunError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Failed { failures, .. }
                if !failures.is_empty()
                    && failures
                        .iter()
                        .all(|(_, e)| matches!(e, TaskError::ValidationMismatch(_))) =>
            {
                EXIT_VALIDATION_MISMATCH
            }
            _ => EXIT_EXECUTION,
        }
    }
}
