//! In-memory cloud backend
//!
//! `MemoryCloud` keeps every resource in process memory and derives the
//! attributes a real provider would fill in (ids, ARNs, DNS names). It backs
//! the `--cloud-state` local mode of the CLI and every test in the workspace.
//!
//! The backend is organized into domain-specific modules:
//! - `ec2.rs` - VPC, subnets, routing, addresses, instances, volumes
//! - `elb.rs` - classic and network load balancers, target groups
//! - `iam.rs` - roles, policies, instance profiles, OIDC providers
//! - `misc.rs` - autoscaling, Route53, SQS, EventBridge, key pairs

mod ec2;
mod elb;
mod iam;
mod misc;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::cloud_trait::CloudApi;
use crate::error::CloudError;
use crate::models::{CloudObject, ResourceKind};

/// Backend verbs, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `query`
    Query,
    /// `get`
    Get,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `set_tags`
    SetTags,
    /// `remove_tags`
    RemoveTags,
}

impl Verb {
    /// Verb changes backend state
    pub fn is_mutating(self) -> bool {
        !matches!(self, Verb::Query | Verb::Get)
    }
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCall {
    /// Verb
    pub verb: Verb,
    /// Resource kind
    pub kind: ResourceKind,
    /// Target id, when the verb addresses one resource
    pub id: Option<String>,
}

type ErrorFactory = Arc<dyn Fn() -> CloudError + Send + Sync>;

struct InjectedFailure {
    verb: Verb,
    kind: Option<ResourceKind>,
    remaining: usize,
    error: ErrorFactory,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    region: String,
    account_id: String,
    next_id: u64,
    objects: Vec<CloudObject>,
}

/// In-memory backend
///
/// Clones share the same store, so a test can keep a handle while the engine
/// owns another.
#[derive(Clone)]
pub struct MemoryCloud {
    pub(crate) region: String,
    pub(crate) account_id: String,
    pub(crate) objects: Arc<Mutex<BTreeMap<ResourceKind, BTreeMap<String, CloudObject>>>>,
    pub(crate) next_id: Arc<Mutex<u64>>,
    calls: Arc<Mutex<Vec<CloudCall>>>,
    failures: Arc<Mutex<Vec<InjectedFailure>>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl std::fmt::Debug for MemoryCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCloud")
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryCloud {
    /// Create an empty backend
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
            latency: Arc::new(Mutex::new(None)),
        }
    }

    /// Load a backend from a JSON snapshot, or start empty when the file is missing
    ///
    /// # Arguments
    ///
    /// * `path` - Snapshot file written by [`MemoryCloud::save`]
    /// * `region` - Region used when the file does not exist yet
    /// * `account_id` - Account used when the file does not exist yet
    pub async fn load(path: &Path, region: &str, account_id: &str) -> Result<Self, CloudError> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cloud state file, starting empty");
                return Ok(Self::new(region, account_id));
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        let cloud = Self::new(snapshot.region, snapshot.account_id);
        *locked(&cloud.next_id) = snapshot.next_id.max(1);
        {
            let mut objects = locked(&cloud.objects);
            for object in snapshot.objects {
                objects
                    .entry(object.kind)
                    .or_default()
                    .insert(object.id.clone(), object);
            }
        }
        Ok(cloud)
    }

    /// Write the store to a JSON snapshot
    pub async fn save(&self, path: &Path) -> Result<(), CloudError> {
        let snapshot = Snapshot {
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            next_id: *locked(&self.next_id),
            objects: self.all_objects(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    /// Add a resource directly (for test setup and pre-existing shared resources)
    pub fn insert(&self, object: CloudObject) {
        locked(&self.objects)
            .entry(object.kind)
            .or_default()
            .insert(object.id.clone(), object);
    }

    /// All resources of one kind, ordered by id
    pub fn objects(&self, kind: ResourceKind) -> Vec<CloudObject> {
        locked(&self.objects)
            .get(&kind)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every stored resource
    pub fn all_objects(&self) -> Vec<CloudObject> {
        locked(&self.objects)
            .values()
            .flat_map(|m| m.values().cloned())
            .collect()
    }

    /// Number of resources of one kind
    pub fn count(&self, kind: ResourceKind) -> usize {
        locked(&self.objects).get(&kind).map_or(0, BTreeMap::len)
    }

    /// Recorded calls, oldest first
    pub fn calls(&self) -> Vec<CloudCall> {
        locked(&self.calls).clone()
    }

    /// Recorded calls that changed state
    pub fn mutating_calls(&self) -> Vec<CloudCall> {
        locked(&self.calls)
            .iter()
            .filter(|c| c.verb.is_mutating())
            .cloned()
            .collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        locked(&self.calls).clear();
    }

    /// Make the next `times` matching calls fail
    ///
    /// # Arguments
    ///
    /// * `verb` - Verb to fail
    /// * `kind` - Only fail calls on this kind (`None` matches every kind)
    /// * `times` - Number of calls to fail
    /// * `error` - Builds the returned error
    pub fn inject_failure(
        &self,
        verb: Verb,
        kind: Option<ResourceKind>,
        times: usize,
        error: impl Fn() -> CloudError + Send + Sync + 'static,
    ) {
        locked(&self.failures).push(InjectedFailure {
            verb,
            kind,
            remaining: times,
            error: Arc::new(error),
        });
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *locked(&self.latency) = latency;
    }

    /// Generate next ID
    pub(crate) fn next_id(&self) -> u64 {
        let mut id = locked(&self.next_id);
        let current = *id;
        *id += 1;
        current
    }

    async fn record(&self, verb: Verb, kind: ResourceKind, id: Option<&str>) -> Result<(), CloudError> {
        let latency = *locked(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        locked(&self.calls).push(CloudCall {
            verb,
            kind,
            id: id.map(ToString::to_string),
        });
        let mut failures = locked(&self.failures);
        if let Some(failure) = failures
            .iter_mut()
            .find(|f| f.verb == verb && f.remaining > 0 && f.kind.is_none_or(|k| k == kind))
        {
            failure.remaining -= 1;
            return Err((failure.error)());
        }
        Ok(())
    }

    fn assign_id(&self, kind: ResourceKind, attributes: &Map<String, Value>) -> Result<String, CloudError> {
        if kind.is_named_by_caller() {
            let name = attributes
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| CloudError::InvalidRequest(format!("{kind} requires a name")))?;
            if locked(&self.objects)
                .get(&kind)
                .is_some_and(|m| m.contains_key(name))
            {
                return Err(CloudError::AlreadyExists(format!("{kind} {name}")));
            }
            return Ok(name.to_string());
        }
        let n = self.next_id();
        Ok(match kind {
            ResourceKind::HostedZone => format!("Z{n:013X}"),
            ResourceKind::NetworkLoadBalancer | ResourceKind::TargetGroup | ResourceKind::IamOidcProvider => {
                format!("{}-{n:08x}", id_prefix(kind))
            }
            _ => format!("{}-{n:017x}", id_prefix(kind)),
        })
    }

    fn stored(&self, kind: ResourceKind, id: &str) -> Result<CloudObject, CloudError> {
        locked(&self.objects)
            .get(&kind)
            .and_then(|m| m.get(id))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("{kind} {id}")))
    }

    fn store(&self, object: CloudObject) {
        self.insert(object);
    }
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Vpc => "vpc",
        ResourceKind::VpcCidrBlock | ResourceKind::VpcIpv6CidrBlock => "vpc-cidr-assoc",
        ResourceKind::DhcpOptions => "dopt",
        ResourceKind::DhcpOptionsAssociation => "dopt-assoc",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::EgressOnlyInternetGateway => "eigw",
        ResourceKind::NatGateway => "nat",
        ResourceKind::ElasticIp => "eipalloc",
        ResourceKind::Instance => "i",
        ResourceKind::Subnet => "subnet",
        ResourceKind::RouteTable => "rtb",
        ResourceKind::RouteTableAssociation => "rtbassoc",
        ResourceKind::Route => "r",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::SecurityGroupRule => "sgr",
        ResourceKind::NetworkLoadBalancer => "net",
        ResourceKind::TargetGroup => "tg",
        ResourceKind::LaunchTemplate => "lt",
        ResourceKind::LifecycleHook => "hook",
        ResourceKind::LoadBalancerAttachment | ResourceKind::TargetGroupAttachment => "attach",
        ResourceKind::IamRolePolicy => "policy",
        ResourceKind::IamRolePolicyAttachment => "policy-attach",
        ResourceKind::IamInstanceProfileRole => "profile-role",
        ResourceKind::IamOidcProvider => "oidc",
        ResourceKind::EbsVolume => "vol",
        ResourceKind::ResourceRecordSet => "rrset",
        ResourceKind::EventTarget => "target",
        ResourceKind::HostedZone
        | ResourceKind::ClassicLoadBalancer
        | ResourceKind::LaunchConfiguration
        | ResourceKind::AutoscalingGroup
        | ResourceKind::IamRole
        | ResourceKind::IamInstanceProfile
        | ResourceKind::KeyPair
        | ResourceKind::SqsQueue
        | ResourceKind::EventRule => "res",
    }
}

/// Fill in provider-derived attributes of a freshly created resource
fn derive_attributes(cloud: &MemoryCloud, object: &mut CloudObject) -> Result<(), CloudError> {
    match object.kind {
        ResourceKind::ClassicLoadBalancer | ResourceKind::NetworkLoadBalancer | ResourceKind::TargetGroup => {
            elb::derive(cloud, object);
        }
        ResourceKind::IamRole
        | ResourceKind::IamInstanceProfile
        | ResourceKind::IamOidcProvider
        | ResourceKind::IamRolePolicy
        | ResourceKind::IamRolePolicyAttachment
        | ResourceKind::IamInstanceProfileRole => iam::derive(cloud, object)?,
        ResourceKind::AutoscalingGroup
        | ResourceKind::HostedZone
        | ResourceKind::SqsQueue
        | ResourceKind::EventRule
        | ResourceKind::KeyPair => misc::derive(cloud, object),
        _ => ec2::derive(cloud, object)?,
    }
    Ok(())
}

#[async_trait::async_trait]
impl CloudApi for MemoryCloud {
    fn region(&self) -> &str {
        &self.region
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn query(&self, kind: ResourceKind, filters: &[(&str, &str)]) -> Result<Vec<CloudObject>, CloudError> {
        self.record(Verb::Query, kind, None).await?;
        Ok(self
            .objects(kind)
            .into_iter()
            .filter(|o| filters.iter().all(|(k, v)| o.matches(k, v)))
            .collect())
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<CloudObject>, CloudError> {
        self.record(Verb::Get, kind, Some(id)).await?;
        Ok(locked(&self.objects)
            .get(&kind)
            .and_then(|m| m.get(id))
            .cloned())
    }

    async fn create(
        &self,
        kind: ResourceKind,
        attributes: Map<String, Value>,
        tags: BTreeMap<String, String>,
    ) -> Result<CloudObject, CloudError> {
        self.record(Verb::Create, kind, None).await?;
        let id = self.assign_id(kind, &attributes)?;
        let mut object = CloudObject {
            id,
            kind,
            attributes,
            tags,
        };
        derive_attributes(self, &mut object)?;
        debug!(kind = %kind, id = %object.id, "Created resource");
        self.store(object.clone());
        Ok(object)
    }

    async fn update(&self, kind: ResourceKind, id: &str, attributes: Map<String, Value>) -> Result<CloudObject, CloudError> {
        self.record(Verb::Update, kind, Some(id)).await?;
        let mut object = self.stored(kind, id)?;
        for (key, value) in attributes {
            if value.is_null() {
                object.attributes.remove(&key);
            } else {
                object.attributes.insert(key, value);
            }
        }
        if kind == ResourceKind::LaunchTemplate {
            ec2::bump_template_version(&mut object);
        }
        self.store(object.clone());
        Ok(object)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), CloudError> {
        self.record(Verb::Delete, kind, Some(id)).await?;
        let removed = locked(&self.objects)
            .get_mut(&kind)
            .and_then(|m| m.remove(id));
        match removed {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound(format!("{kind} {id}"))),
        }
    }

    async fn set_tags(&self, kind: ResourceKind, id: &str, tags: &BTreeMap<String, String>) -> Result<(), CloudError> {
        self.record(Verb::SetTags, kind, Some(id)).await?;
        let mut object = self.stored(kind, id)?;
        object
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.store(object);
        Ok(())
    }

    async fn remove_tags(&self, kind: ResourceKind, id: &str, keys: &[String]) -> Result<(), CloudError> {
        self.record(Verb::RemoveTags, kind, Some(id)).await?;
        let mut object = self.stored(kind, id)?;
        for key in keys {
            object.tags.remove(key);
        }
        self.store(object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_generated_and_named_ids() {
        let cloud = MemoryCloud::new("us-test-1", "123456789012");
        let vpc = cloud
            .create(ResourceKind::Vpc, attrs(json!({"cidr_block": "10.0.0.0/16"})), BTreeMap::new())
            .await
            .unwrap();
        assert!(vpc.id.starts_with("vpc-"));

        let role = cloud
            .create(ResourceKind::IamRole, attrs(json!({"name": "masters.example.com"})), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(role.id, "masters.example.com");
        assert_eq!(
            role.attr_str("arn").as_deref(),
            Some("arn:aws:iam::123456789012:role/masters.example.com")
        );

        let dup = cloud
            .create(ResourceKind::IamRole, attrs(json!({"name": "masters.example.com"})), BTreeMap::new())
            .await;
        assert!(matches!(dup, Err(CloudError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_update_merges_and_removes_null() {
        let cloud = MemoryCloud::new("us-test-1", "123456789012");
        let sg = cloud
            .create(
                ResourceKind::SecurityGroup,
                attrs(json!({"name": "nodes", "description": "x"})),
                BTreeMap::new(),
            )
            .await
            .unwrap();
        let updated = cloud
            .update(ResourceKind::SecurityGroup, &sg.id, attrs(json!({"description": null, "vpc_id": "vpc-1"})))
            .await
            .unwrap();
        assert!(updated.attributes.get("description").is_none());
        assert_eq!(updated.attr_str("vpc_id").as_deref(), Some("vpc-1"));
        assert_eq!(updated.attr_str("name").as_deref(), Some("nodes"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let cloud = MemoryCloud::new("us-test-1", "123456789012");
        cloud.inject_failure(Verb::Query, Some(ResourceKind::Vpc), 1, || {
            CloudError::Throttled("slow down".to_string())
        });
        assert!(cloud.query(ResourceKind::Vpc, &[]).await.is_err());
        assert!(cloud.query(ResourceKind::Vpc, &[]).await.is_ok());
        assert_eq!(cloud.calls().len(), 2);
        assert!(cloud.mutating_calls().is_empty());
    }
}
