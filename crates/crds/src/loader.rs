//! Loads a Cluster and its InstanceGroups from a multi-document YAML stream

use serde::Deserialize;
use thiserror::Error;

use crate::cluster::Cluster;
use crate::instance_group::InstanceGroup;

/// Errors raised while reading cluster documents
#[derive(Debug, Error)]
pub enum LoadError {
    /// A document is not valid YAML or does not match its kind
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The stream holds no Cluster document
    #[error("no Cluster document found")]
    MissingCluster,

    /// The stream holds more than one Cluster document
    #[error("found more than one Cluster document")]
    MultipleClusters,

    /// A document has an unsupported kind
    #[error("unsupported document kind {0:?}")]
    UnknownKind(String),
}

/// Parses every document of `input`, returning the Cluster and its InstanceGroups
///
/// Empty documents are skipped. Instance groups keep their document order.
pub fn load_documents(input: &str) -> Result<(Cluster, Vec<InstanceGroup>), LoadError> {
    let mut cluster = None;
    let mut groups = Vec::new();

    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default()
            .to_string();
        match kind.as_str() {
            "Cluster" => {
                if cluster.is_some() {
                    return Err(LoadError::MultipleClusters);
                }
                cluster = Some(serde_yaml::from_value::<Cluster>(value)?);
            }
            "InstanceGroup" => groups.push(serde_yaml::from_value::<InstanceGroup>(value)?),
            other => return Err(LoadError::UnknownKind(other.to_string())),
        }
    }

    let cluster = cluster.ok_or(LoadError::MissingCluster)?;
    Ok((cluster, groups))
}
