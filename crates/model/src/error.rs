//! Model errors

use crds::ValidationError;
use fi::error::{EXIT_COMPILE, EXIT_VALIDATION};
use fi::{CompileError, TaskError};
use thiserror::Error;

/// Errors raised while building the task registry from the cluster model
#[derive(Debug, Error)]
pub enum ModelError {
    /// The cluster model is inconsistent in a way builders detect
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The registry rejected a task
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A task could not be constructed from the model
    #[error("building {what}: {source}")]
    Task {
        /// What was being built
        what: String,
        /// Underlying error
        source: TaskError,
    },

    /// Serialising a generated document failed
    #[error("encoding {what}: {source}")]
    Encode {
        /// Document being encoded
        what: String,
        /// Underlying error
        source: serde_json::Error,
    },
}

impl ModelError {
    /// Single-field validation error
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::Validation(ValidationError::field(field, message))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ModelError::Validation(_) => EXIT_VALIDATION,
            ModelError::Compile(e) => e.exit_code(),
            ModelError::Task { .. } | ModelError::Encode { .. } => EXIT_COMPILE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fi::TaskKey;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ModelError::invalid("spec.dnsZone", "required").exit_code(), EXIT_VALIDATION);
        let duplicate = ModelError::from(CompileError::DuplicateTask {
            key: TaskKey::new("VPC", "x"),
        });
        assert_eq!(duplicate.exit_code(), EXIT_COMPILE);
    }
}
