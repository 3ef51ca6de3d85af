//! The completed cluster spec and tool version, written under the config base

use awstasks::ManagedFile;
use fi::{ModelBuilderContext, Resource};

use crate::ModelBuilder;
use crate::context::{ModelContext, VERSION};
use crate::error::ModelError;

pub const COMPLETED_SPEC_LOCATION: &str = "cluster-completed.spec";
pub const VERSION_LOCATION: &str = "kops-version.txt";

/// Records what was applied so later runs and nodes can read it back
#[derive(Debug, Default)]
pub struct ConfigBuilder;

impl ModelBuilder for ConfigBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let spec = serde_yaml::to_string(&model.cluster).map_err(|e| ModelError::Task {
            what: "completed cluster spec".to_string(),
            source: e.into(),
        })?;
        c.add(ManagedFile::new(
            COMPLETED_SPEC_LOCATION,
            COMPLETED_SPEC_LOCATION,
            Resource::from_string(spec),
        ))?;
        c.add(ManagedFile::new(VERSION_LOCATION, VERSION_LOCATION, Resource::from_string(VERSION)))?;
        Ok(())
    }
}
