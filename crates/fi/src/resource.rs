//! Resources: byte contents that may only be known during execution
//!
//! A static resource holds its bytes. A lazy resource names a resolver and
//! the tasks that must have run before it can be evaluated; those tasks
//! become dependency edges of whichever task holds the resource.

use std::fmt;
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::context::RunContext;
use crate::error::TaskError;
use crate::key::TaskKey;

/// Field name marking a serialized resource
pub const RESOURCE_MARKER: &str = "$resource";

/// Produces the bytes of a lazy resource
#[async_trait::async_trait]
pub trait ResourceResolver: Send + Sync + fmt::Debug {
    /// Evaluate the resource
    async fn resolve(&self, ctx: &RunContext) -> Result<Vec<u8>, TaskError>;

    /// Stable description used for equality and dry-run output
    fn describe(&self) -> String;
}

/// Byte contents of a task field
#[derive(Clone)]
pub enum Resource {
    /// Known at compile time
    Static(Arc<[u8]>),
    /// Evaluated during execution once `predecessors` have run
    Lazy {
        /// Resolver
        resolver: Arc<dyn ResourceResolver>,
        /// Tasks that must run first
        predecessors: Vec<TaskKey>,
    },
}

impl Resource {
    /// Static resource from text
    pub fn from_string(s: impl Into<String>) -> Self {
        Resource::Static(Arc::from(s.into().into_bytes()))
    }

    /// Static resource from bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Resource::Static(Arc::from(bytes.into()))
    }

    /// Lazy resource
    pub fn lazy(resolver: Arc<dyn ResourceResolver>, predecessors: Vec<TaskKey>) -> Self {
        Resource::Lazy {
            resolver,
            predecessors,
        }
    }

    /// Lazy resource reading an output recorded by another task
    pub fn task_output(key: TaskKey, attribute: impl Into<String>) -> Self {
        let resolver = TaskOutputResolver {
            key: key.clone(),
            attribute: attribute.into(),
        };
        Resource::Lazy {
            resolver: Arc::new(resolver),
            predecessors: vec![key],
        }
    }

    /// Bytes, for static resources
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Resource::Static(bytes) => Some(bytes),
            Resource::Lazy { .. } => None,
        }
    }

    /// Bytes as text, for static resources
    pub fn as_text(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    /// Tasks that must run before evaluation
    pub fn predecessors(&self) -> &[TaskKey] {
        match self {
            Resource::Static(_) => &[],
            Resource::Lazy { predecessors, .. } => predecessors,
        }
    }

    /// Evaluate into a static resource
    pub async fn materialize(&self, ctx: &RunContext) -> Result<Resource, TaskError> {
        match self {
            Resource::Static(_) => Ok(self.clone()),
            Resource::Lazy { resolver, .. } => Ok(Resource::from_bytes(resolver.resolve(ctx).await?)),
        }
    }

    /// Hex SHA-256 of the bytes, for static resources
    pub fn sha256_hex(&self) -> Option<String> {
        self.as_bytes().map(|b| hex::encode(Sha256::digest(b)))
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Static(bytes) => write!(f, "Resource::Static({} bytes)", bytes.len()),
            Resource::Lazy { resolver, .. } => write!(f, "Resource::Lazy({})", resolver.describe()),
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Resource::Static(a), Resource::Static(b)) => a == b,
            (
                Resource::Lazy {
                    resolver: ra,
                    predecessors: pa,
                },
                Resource::Lazy {
                    resolver: rb,
                    predecessors: pb,
                },
            ) => ra.describe() == rb.describe() && pa == pb,
            _ => false,
        }
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Resource::Static(_) => {
                map.serialize_entry(RESOURCE_MARKER, &json!({ "sha256": self.sha256_hex() }))?;
            }
            Resource::Lazy {
                resolver,
                predecessors,
            } => {
                let after: Vec<String> = predecessors.iter().map(ToString::to_string).collect();
                map.serialize_entry(
                    RESOURCE_MARKER,
                    &json!({ "lazy": resolver.describe(), "after": after }),
                )?;
            }
        }
        map.end()
    }
}

/// Resolves to an output another task recorded
#[derive(Debug, Clone)]
pub struct TaskOutputResolver {
    /// Producing task
    pub key: TaskKey,
    /// Output name
    pub attribute: String,
}

#[async_trait::async_trait]
impl ResourceResolver for TaskOutputResolver {
    async fn resolve(&self, ctx: &RunContext) -> Result<Vec<u8>, TaskError> {
        Ok(ctx.output(&self.key, &self.attribute)?.into_bytes())
    }

    fn describe(&self) -> String {
        format!("{}.{}", self.key, self.attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_serializes_as_hash() {
        let r = Resource::from_string("hello");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v[RESOURCE_MARKER]["sha256"],
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_lazy_equality_by_description() {
        let a = Resource::task_output(TaskKey::new("BootstrapScript", "nodes"), "nodeup_config");
        let b = Resource::task_output(TaskKey::new("BootstrapScript", "nodes"), "nodeup_config");
        let c = Resource::task_output(TaskKey::new("BootstrapScript", "nodes"), "user_data");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.predecessors(), &[TaskKey::new("BootstrapScript", "nodes")]);
    }
}
