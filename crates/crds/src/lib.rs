//! Cluster API types
//!
//! Custom resource definitions for the Cluster and InstanceGroup objects,
//! plus loading and pre-compile validation.

pub mod cluster;
pub mod instance_group;
pub mod loader;
pub mod validation;

pub use cluster::*;
pub use instance_group::*;
pub use loader::{LoadError, load_documents};
pub use validation::{FieldError, ValidationError, validate_cluster};
