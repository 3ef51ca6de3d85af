//! CloudApi trait
//!
//! The verbs every task needs from a backend. Real SDK clients, the in-memory
//! backend and the retry wrapper all implement it, so tasks never see which
//! one they talk to.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::CloudError;
use crate::models::{CloudObject, ResourceKind};

/// Trait for cloud backend operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait CloudApi: Send + Sync {
    /// Region the client operates in
    fn region(&self) -> &str;

    /// Account id used to build ARNs
    fn account_id(&self) -> &str;

    /// ARN partition (`aws`, `aws-cn`, `aws-us-gov`)
    fn partition(&self) -> &str {
        if self.region().starts_with("cn-") {
            "aws-cn"
        } else if self.region().starts_with("us-gov-") {
            "aws-us-gov"
        } else {
            "aws"
        }
    }

    /// List resources of `kind` matching every filter
    ///
    /// Filter keys are `id`, `tag:<key>`, `tag-key` or an attribute name.
    async fn query(&self, kind: ResourceKind, filters: &[(&str, &str)]) -> Result<Vec<CloudObject>, CloudError>;

    /// Fetch one resource by provider id
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<CloudObject>, CloudError>;

    /// Create a resource; the backend assigns the id and derived attributes
    async fn create(
        &self,
        kind: ResourceKind,
        attributes: Map<String, Value>,
        tags: BTreeMap<String, String>,
    ) -> Result<CloudObject, CloudError>;

    /// Merge attributes into an existing resource; `null` values remove keys
    async fn update(&self, kind: ResourceKind, id: &str, attributes: Map<String, Value>) -> Result<CloudObject, CloudError>;

    /// Delete a resource
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), CloudError>;

    /// Add or overwrite tags
    async fn set_tags(&self, kind: ResourceKind, id: &str, tags: &BTreeMap<String, String>) -> Result<(), CloudError>;

    /// Remove tags by key
    async fn remove_tags(&self, kind: ResourceKind, id: &str, keys: &[String]) -> Result<(), CloudError>;
}
