//! Render targets

pub mod cloudformation;
pub mod dryrun;
pub mod terraform;

use std::fmt;
use std::sync::Arc;

use crate::error::TaskError;

use self::cloudformation::CloudFormationTarget;
use self::dryrun::DryRunTarget;
use self::terraform::TerraformTarget;

/// Where rendered changes go
#[derive(Debug, Clone)]
pub enum Target {
    /// Apply through the cloud API
    Direct,
    /// Write a Terraform configuration
    Terraform(Arc<TerraformTarget>),
    /// Write a CloudFormation template
    CloudFormation(Arc<CloudFormationTarget>),
    /// Report what would change
    DryRun(Arc<DryRunTarget>),
}

impl Target {
    /// Name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Target::Direct => "direct",
            Target::Terraform(_) => "terraform",
            Target::CloudFormation(_) => "cloudformation",
            Target::DryRun(_) => "dryrun",
        }
    }

    /// Whether tasks look up existing state before rendering
    pub fn checks_existing(&self) -> bool {
        matches!(self, Target::Direct | Target::DryRun(_))
    }

    /// Dry run
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Target::DryRun(_))
    }

    /// Write any buffered output
    pub async fn finish(&self) -> Result<(), TaskError> {
        match self {
            Target::Direct | Target::DryRun(_) => Ok(()),
            Target::Terraform(tf) => tf.finish().await,
            Target::CloudFormation(cf) => cf.finish().await,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Turn a task name into an identifier usable by Terraform and CloudFormation
///
/// Dots and slashes become dashes; a leading digit gets an underscore prefix.
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| match c {
            '.' | '/' | ':' => '-',
            c => c,
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("minimal.example.com"), "minimal-example-com");
        assert_eq!(sanitize_name("0.0.0.0/0"), "_0-0-0-0-0");
    }
}
