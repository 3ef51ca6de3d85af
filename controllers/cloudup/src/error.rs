//! Errors surfaced by the cloudup binary and their exit codes

use crds::{LoadError, ValidationError};
use fi::error::{EXIT_COMPILE, EXIT_VALIDATION};
use fi::{CompileError, RunError};
use model::ModelError;
use thiserror::Error;

/// Exit code for failures outside the model (unreadable files, bad locations)
pub const EXIT_FAILURE: i32 = 1;

/// Errors that end a cloudup run
#[derive(Debug, Error)]
pub enum CliError {
    /// The cluster documents could not be parsed
    #[error("loading cluster documents: {0}")]
    Load(#[from] LoadError),

    /// The cluster documents are inconsistent
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// `--lifecycle-overrides` is malformed
    #[error("lifecycle overrides: {0}")]
    Overrides(#[source] CompileError),

    /// Building or ordering the task graph failed
    #[error("building model: {0}")]
    Model(#[from] ModelError),

    /// One or more tasks failed
    #[error("{0}")]
    Run(#[from] RunError),

    /// I/O and other failures around the run
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Load(_) | CliError::Validation(_) => EXIT_VALIDATION,
            CliError::Overrides(_) => EXIT_COMPILE,
            CliError::Model(e) => e.exit_code(),
            CliError::Run(e) => e.exit_code(),
            CliError::Other(_) => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fi::error::{EXIT_EXECUTION, EXIT_VALIDATION_MISMATCH};
    use fi::{TaskError, TaskKey};

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Load(LoadError::MissingCluster).exit_code(), EXIT_VALIDATION);
        assert_eq!(
            CliError::Validation(ValidationError::field("spec.networking", "bad")).exit_code(),
            EXIT_VALIDATION
        );
        assert_eq!(
            CliError::Overrides(CompileError::InvalidOverride("x".to_string())).exit_code(),
            EXIT_COMPILE
        );
        assert_eq!(CliError::Run(RunError::Cancelled).exit_code(), EXIT_EXECUTION);
        let mismatch = RunError::Failed {
            failures: vec![(
                TaskKey::new("Vpc", "example.com"),
                TaskError::ValidationMismatch("cidr differs".to_string()),
            )],
            not_started: 0,
        };
        assert_eq!(CliError::Run(mismatch).exit_code(), EXIT_VALIDATION_MISMATCH);
        assert_eq!(CliError::Other(anyhow::anyhow!("disk full")).exit_code(), EXIT_FAILURE);
    }
}
