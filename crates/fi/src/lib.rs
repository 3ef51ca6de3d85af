//! Task engine
//!
//! Builders register typed tasks in a [`ModelBuilderContext`]. The registry
//! snapshot is turned into a [`TaskGraph`] (dependencies inferred from
//! [`Link`] and lazy [`Resource`] fields) and run by the [`Executor`]
//! against one [`Target`]: the cloud API directly, a Terraform
//! configuration, a CloudFormation template, or a dry-run report.

pub mod changes;
pub mod context;
pub mod error;
pub mod executor;
pub mod featureflag;
pub mod graph;
pub mod key;
pub mod lifecycle;
pub mod pki;
pub mod registry;
pub mod resource;
pub mod target;
pub mod task;

pub use changes::{Changes, FieldChange};
pub use context::{OutputStore, RunContext};
pub use error::{CompileError, RunError, TaskError};
pub use executor::{Executor, RunReport};
pub use featureflag::FeatureFlags;
pub use graph::TaskGraph;
pub use key::{Link, TaskKey};
pub use lifecycle::Lifecycle;
pub use registry::ModelBuilderContext;
pub use resource::{Resource, ResourceResolver};
pub use target::Target;
pub use target::cloudformation::CloudFormationTarget;
pub use target::dryrun::DryRunTarget;
pub use target::terraform::{HclBody, TerraformTarget};
pub use task::{CloudupTask, Deletion, Outputs, Task, TaskMap, TaskOutcome};
