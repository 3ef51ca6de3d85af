//! Model context: the validated cluster plus naming, link and tag helpers
//!
//! Every name a builder emits is derived here so that two builders that
//! refer to the same cloud resource agree on its task key without talking to
//! each other.

use std::collections::{BTreeMap, BTreeSet};

use awstasks::{
    ClassicLoadBalancer, DnsZone, IamInstanceProfile, NetworkLoadBalancer, SecurityGroup, Subnet, Tags, TargetGroup,
    Vpc,
};
use crds::{
    Cluster, ClusterSubnetSpec, InstanceGroup, InstanceGroupRole, LoadBalancerAccessSpec, LoadBalancerClass,
    LoadBalancerType, SubnetType,
};
use data_encoding::BASE32HEX;
use fi::featureflag::USE_LEGACY_ELB_NAME;
use fi::{FeatureFlags, Link};
use tracing::{debug, info};

use crate::error::ModelError;

/// Tag holding the owning cluster name
pub const TAG_CLUSTER_NAME: &str = "KubernetesCluster";
/// Prefix of the per-cluster ownership tag
pub const TAG_CLUSTER_OWNERSHIP_PREFIX: &str = "kubernetes.io/cluster/";
/// Tag naming the role of a route table
pub const TAG_KOPS_ROLE: &str = "kubernetes.io/kops/role";
/// Tag naming the instance group of an autoscaling group
pub const TAG_INSTANCE_GROUP: &str = "kops.k8s.io/instancegroup";
/// Prefix of autoscaler node template label tags
pub const TAG_NODE_TEMPLATE_LABEL: &str = "k8s.io/cluster-autoscaler/node-template/label/";
/// Prefix of autoscaler node template taint tags
pub const TAG_NODE_TEMPLATE_TAINT: &str = "k8s.io/cluster-autoscaler/node-template/taint/";
/// Prefix of instance role tags
pub const TAG_ROLE_PREFIX: &str = "k8s.io/role/";

/// Version recorded in the state store next to the completed cluster
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Release location nodeup is downloaded from unless overridden
pub const DEFAULT_NODEUP_BASE: &str = "https://artifacts.k8s.io/binaries/kops";

const MAX_ELB_NAME: usize = 32;
const ELB_HASH_LENGTH: usize = 6;

/// A security group an instance group role is placed in
#[derive(Debug, Clone)]
pub struct SecurityGroupInfo {
    /// Suffix appended to rule names; empty for the default group
    pub suffix: String,
    /// The group task
    pub task: SecurityGroup,
}

impl SecurityGroupInfo {
    /// Link to the group task
    pub fn link(&self) -> Link<SecurityGroup> {
        Link::new(self.task.name.clone())
    }
}

/// 32-bit FNV-1a
fn fnv1a32(data: &[u8]) -> u32 {
    data.iter().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(0x0100_0193)
    })
}

/// Plural role name used for IAM and security group names
pub fn role_plural(role: InstanceGroupRole) -> &'static str {
    match role {
        InstanceGroupRole::ControlPlane => "masters",
        InstanceGroupRole::Node => "nodes",
        InstanceGroupRole::ApiServer => "apiservers",
        InstanceGroupRole::Bastion => "bastions",
    }
}

/// Where instances fetch nodeup from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeupSource {
    pub url: String,
    /// Hex SHA-256 of the binary; empty skips verification
    pub hash: String,
}

impl Default for NodeupSource {
    fn default() -> Self {
        Self {
            url: format!("{DEFAULT_NODEUP_BASE}/{VERSION}/linux/amd64/nodeup"),
            hash: String::new(),
        }
    }
}

/// Immutable inputs of one compilation
#[derive(Debug, Clone)]
pub struct ModelContext {
    /// The cluster
    pub cluster: Cluster,
    /// Its instance groups, in input order
    pub instance_groups: Vec<InstanceGroup>,
    /// SSH public keys supplied by the operator
    pub ssh_public_keys: Vec<String>,
    /// Feature flags snapshotted at compile start
    pub features: FeatureFlags,
    /// Nodeup binary baked into every bootstrap script
    pub nodeup: NodeupSource,
    region: String,
}

impl ModelContext {
    /// Build the context
    ///
    /// # Errors
    /// `ModelError::Validation` when no region can be derived from the subnets
    pub fn new(
        cluster: Cluster,
        instance_groups: Vec<InstanceGroup>,
        ssh_public_keys: Vec<String>,
        features: FeatureFlags,
    ) -> Result<Self, ModelError> {
        let region = cluster
            .region()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ModelError::invalid("spec.networking.subnets", "cannot derive region without subnets"))?;
        Ok(Self {
            cluster,
            instance_groups,
            ssh_public_keys,
            features,
            nodeup: NodeupSource::default(),
            region,
        })
    }

    /// Replace the nodeup download location
    pub fn with_nodeup(mut self, nodeup: NodeupSource) -> Self {
        self.nodeup = nodeup;
        self
    }

    /// Cluster name
    pub fn cluster_name(&self) -> &str {
        self.cluster.cluster_name()
    }

    /// Region the cluster runs in
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Config base URI for the cluster state
    pub fn config_base(&self) -> String {
        self.cluster
            .spec
            .config_base
            .clone()
            .unwrap_or_else(|| format!("memfs://clusters/{}", self.cluster_name()))
    }

    /// EC2 service principal for the region
    pub fn ec2_service_principal(&self) -> &'static str {
        if self.region.starts_with("cn-") {
            "ec2.amazonaws.com.cn"
        } else {
            "ec2.amazonaws.com"
        }
    }

    /// Instance groups with a role
    pub fn instance_groups_with_role(&self, role: InstanceGroupRole) -> Vec<&InstanceGroup> {
        self.instance_groups.iter().filter(|ig| ig.spec.role == role).collect()
    }

    /// Instance group by name
    pub fn find_instance_group(&self, name: &str) -> Option<&InstanceGroup> {
        self.instance_groups.iter().find(|ig| ig.group_name() == name)
    }

    /// Cluster subnet by name
    pub fn find_subnet(&self, name: &str) -> Option<&ClusterSubnetSpec> {
        self.cluster.spec.networking.subnets.iter().find(|s| s.name == name)
    }

    /// Cluster subnets of an instance group, in the group's order
    ///
    /// # Errors
    /// A subnet that does not exist or whose name is ambiguous
    pub fn gather_subnets(&self, ig: &InstanceGroup) -> Result<Vec<&ClusterSubnetSpec>, ModelError> {
        let mut subnets = Vec::with_capacity(ig.spec.subnets.len());
        for name in &ig.spec.subnets {
            let matches: Vec<&ClusterSubnetSpec> = self
                .cluster
                .spec
                .networking
                .subnets
                .iter()
                .filter(|s| &s.name == name)
                .collect();
            match matches.as_slice() {
                [] => {
                    return Err(ModelError::invalid(
                        format!("instanceGroups[{}].spec.subnets", ig.group_name()),
                        format!("subnet not found: {name:?}"),
                    ));
                }
                [subnet] => subnets.push(*subnet),
                _ => {
                    return Err(ModelError::invalid(
                        format!("instanceGroups[{}].spec.subnets", ig.group_name()),
                        format!("found multiple subnets with name: {name:?}"),
                    ));
                }
            }
        }
        Ok(subnets)
    }

    /// Zones an instance group spans, sorted
    pub fn zones_for(&self, ig: &InstanceGroup) -> Result<Vec<String>, ModelError> {
        let zones: BTreeSet<String> = self.gather_subnets(ig)?.into_iter().map(|s| s.zone.clone()).collect();
        Ok(zones.into_iter().collect())
    }

    /// Autoscaling group (and launch configuration) name of an instance group
    pub fn autoscaling_group_name(&self, ig: &InstanceGroup) -> String {
        match ig.spec.role {
            InstanceGroupRole::ControlPlane => format!("{}.masters.{}", ig.group_name(), self.cluster_name()),
            _ => format!("{}.{}", ig.group_name(), self.cluster_name()),
        }
    }

    /// Load balancer name of at most 32 characters
    ///
    /// The name keeps as much of `prefix-cluster` as fits and ends in a short
    /// hash of the full string, so two clusters with a long common prefix
    /// still get distinct names.
    pub fn elb_name32(&self, prefix: &str) -> Result<String, ModelError> {
        let cluster = self.cluster_name();
        if self.features.enabled(USE_LEGACY_ELB_NAME) {
            let first = cluster.split('.').next().unwrap_or_default();
            let mut name = format!("{prefix}-{first}");
            name.truncate(MAX_ELB_NAME);
            info!(name = %name, "UseLegacyELBName is set, built legacy load balancer name");
            return Ok(name);
        }

        let mut base = format!("{prefix}-{}", cluster.replace('.', "-"));
        let mut hash = BASE32HEX.encode(&fnv1a32(base.as_bytes()).to_be_bytes()).to_lowercase();
        hash.truncate(ELB_HASH_LENGTH);

        let max_base = MAX_ELB_NAME - hash.len() - 1;
        if base.len() > max_base {
            let mut cut = max_base;
            while !base.is_char_boundary(cut) {
                cut -= 1;
            }
            base.truncate(cut);
        }
        let name = format!("{base}-{hash}");
        if name.len() > MAX_ELB_NAME {
            return Err(ModelError::invalid(
                "metadata.name",
                format!("load balancer name {name:?} is longer than {MAX_ELB_NAME} characters"),
            ));
        }
        Ok(name)
    }

    /// IAM role and instance profile name of a role
    pub fn iam_name(&self, role: InstanceGroupRole) -> String {
        format!("{}.{}", role_plural(role), self.cluster_name())
    }

    /// Default security group name of a role
    pub fn security_group_name(&self, role: InstanceGroupRole) -> String {
        format!("{}.{}", role_plural(role), self.cluster_name())
    }

    /// Private route table name of a zone
    pub fn name_private_route_table_in_zone(&self, zone: &str) -> String {
        format!("private-{zone}.{}", self.cluster_name())
    }

    /// Task name of the NAT gateway (and its elastic IP) serving a zone
    pub fn name_for_zone_egress(&self, zone: &str) -> String {
        format!("{zone}.{}", self.cluster_name())
    }

    /// Task name of a cluster subnet
    pub fn subnet_task_name(&self, subnet: &ClusterSubnetSpec) -> String {
        format!("{}.{}", subnet.name, self.cluster_name())
    }

    /// Task name of the hosted zone
    pub fn name_for_dns_zone(&self) -> String {
        self.cluster.dns_zone().trim_end_matches('.').to_string()
    }

    /// Link to the cluster VPC
    pub fn link_to_vpc(&self) -> Link<Vpc> {
        Link::new(self.cluster_name())
    }

    /// Link to a cluster subnet
    pub fn link_to_subnet(&self, subnet: &ClusterSubnetSpec) -> Link<Subnet> {
        Link::new(self.subnet_task_name(subnet))
    }

    /// Link to the default security group of a role
    pub fn link_to_security_group(&self, role: InstanceGroupRole) -> Link<SecurityGroup> {
        Link::new(self.security_group_name(role))
    }

    /// Link to the security group an instance group is placed in
    pub fn link_to_security_group_for(&self, ig: &InstanceGroup) -> Link<SecurityGroup> {
        match &ig.spec.security_group_override {
            Some(id) => Link::new(override_group_name(id, ig.spec.role)),
            None => self.link_to_security_group(ig.spec.role),
        }
    }

    /// Name of the instance profile an instance group uses
    ///
    /// Groups with an explicit profile ARN use the existing profile named by
    /// the last path component of the ARN.
    pub fn instance_profile_name(&self, ig: &InstanceGroup) -> Result<String, ModelError> {
        match ig.spec.iam.as_ref().and_then(|i| i.profile.as_deref()) {
            Some(arn) => {
                let profile = IamInstanceProfile::shared_from_arn(arn).map_err(|source| ModelError::Task {
                    what: format!("instance profile of {}", ig.group_name()),
                    source,
                })?;
                Ok(profile.name)
            }
            None => Ok(self.iam_name(ig.spec.role)),
        }
    }

    /// Link to the instance profile an instance group uses
    pub fn link_to_iam_instance_profile(&self, ig: &InstanceGroup) -> Result<Link<IamInstanceProfile>, ModelError> {
        Ok(Link::new(self.instance_profile_name(ig)?))
    }

    /// Link to the hosted zone
    pub fn link_to_dns_zone(&self) -> Link<DnsZone> {
        Link::new(self.name_for_dns_zone())
    }

    /// Link to the classic API load balancer
    pub fn link_to_api_classic_load_balancer(&self) -> Link<ClassicLoadBalancer> {
        Link::new(format!("api.{}", self.cluster_name()))
    }

    /// Link to the network API load balancer
    pub fn link_to_api_network_load_balancer(&self) -> Link<NetworkLoadBalancer> {
        Link::new(format!("api.{}", self.cluster_name()))
    }

    /// Link to the API target group
    pub fn link_to_api_target_group(&self) -> Result<Link<TargetGroup>, ModelError> {
        Ok(Link::new(self.api_target_group_name()?))
    }

    /// Name of the API target group, `tcp-<elbname>`
    pub fn api_target_group_name(&self) -> Result<String, ModelError> {
        Ok(format!("tcp-{}", self.elb_name32("api")?))
    }

    /// Name of the TLS API target group, `tls-<elbname>`
    pub fn api_tls_target_group_name(&self) -> Result<String, ModelError> {
        Ok(format!("tls-{}", self.elb_name32("api")?))
    }

    /// Target groups control-plane instances register with
    ///
    /// The TLS group only exists when the listener terminates TLS.
    pub fn api_target_groups(&self) -> Result<Vec<Link<TargetGroup>>, ModelError> {
        let mut groups = vec![Link::new(self.api_target_group_name()?)];
        if self.api_load_balancer().is_some_and(|lb| lb.ssl_certificate.is_some()) {
            groups.push(Link::new(self.api_tls_target_group_name()?));
        }
        Ok(groups)
    }

    /// Tags for a cluster resource
    ///
    /// Cluster cloud labels first, then the cluster, name and ownership tags.
    pub fn cloud_tags(&self, name: &str, shared: bool) -> Tags {
        let mut tags: Tags = self.cluster.spec.cloud_labels.clone();
        let cluster = self.cluster_name();
        tags.insert(TAG_CLUSTER_NAME.to_string(), cluster.to_string());
        if !name.is_empty() {
            tags.insert("Name".to_string(), name.to_string());
        }
        let ownership = if shared { "shared" } else { "owned" };
        tags.insert(format!("{TAG_CLUSTER_OWNERSHIP_PREFIX}{cluster}"), ownership.to_string());
        tags
    }

    /// Tags describing an instance group to the cluster autoscaler
    pub fn cloud_tags_for_instance_group(&self, ig: &InstanceGroup) -> Tags {
        let mut tags: Tags = self.cluster.spec.cloud_labels.clone();
        tags.extend(ig.spec.cloud_labels.clone());
        for (key, value) in &ig.spec.node_labels {
            tags.insert(format!("{TAG_NODE_TEMPLATE_LABEL}{key}"), value.clone());
        }
        for taint in &ig.spec.taints {
            if let Some((key, value)) = taint.split_once('=') {
                tags.insert(format!("{TAG_NODE_TEMPLATE_TAINT}{key}"), value.to_string());
            }
        }
        tags.insert(format!("{TAG_ROLE_PREFIX}{}", ig.spec.role.key()), "1".to_string());
        if ig.is_control_plane() {
            tags.insert(format!("{TAG_ROLE_PREFIX}control-plane"), "1".to_string());
        }
        tags
    }

    /// Picks the subnet of a zone a load balancer should attach to
    ///
    /// Candidates score one point when a control-plane group runs in them
    /// and one point when their type suits the load balancer (utility for
    /// public, private for internal). Highest score wins, then the lowest
    /// name.
    pub fn choose_subnet_for_zone<'a>(
        &self,
        zone: &str,
        candidates: &[&'a ClusterSubnetSpec],
        internal: bool,
    ) -> Option<&'a ClusterSubnetSpec> {
        if candidates.len() <= 1 {
            return candidates.first().copied();
        }

        let control_plane_subnets: BTreeSet<&str> = self
            .instance_groups_with_role(InstanceGroupRole::ControlPlane)
            .into_iter()
            .flat_map(|ig| ig.spec.subnets.iter().map(String::as_str))
            .collect();
        let preferred = if internal { SubnetType::Private } else { SubnetType::Utility };

        let mut scored: Vec<(u32, &'a ClusterSubnetSpec)> = candidates
            .iter()
            .map(|subnet| {
                let mut score = 0;
                if control_plane_subnets.contains(subnet.name.as_str()) {
                    score += 1;
                }
                if subnet.subnet_type == preferred {
                    score += 1;
                }
                (score, *subnet)
            })
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.name.cmp(&b.name)));

        if scored[0].0 == scored[1].0 {
            debug!(
                zone,
                chosen = %scored[0].1.name,
                other = %scored[1].1.name,
                "Making arbitrary choice between subnets in zone"
            );
        }
        Some(scored[0].1)
    }

    /// One subnet per zone for a load balancer, zones in order
    ///
    /// Public load balancers use public and utility subnets, internal ones
    /// private and dual-stack subnets.
    pub fn load_balancer_subnets(&self, internal: bool) -> Vec<&ClusterSubnetSpec> {
        let mut by_zone: BTreeMap<&str, Vec<&ClusterSubnetSpec>> = BTreeMap::new();
        for subnet in &self.cluster.spec.networking.subnets {
            if subnet.subnet_type.is_private() != internal {
                continue;
            }
            by_zone.entry(subnet.zone.as_str()).or_default().push(subnet);
        }
        by_zone
            .into_iter()
            .filter_map(|(zone, candidates)| self.choose_subnet_for_zone(zone, &candidates, internal))
            .collect()
    }

    /// The API is fronted by a load balancer
    pub fn use_load_balancer_for_api(&self) -> bool {
        self.cluster.spec.api.as_ref().is_some_and(|a| a.load_balancer.is_some())
    }

    /// The API load balancer is a network load balancer
    pub fn use_network_load_balancer(&self) -> bool {
        self.api_load_balancer()
            .is_some_and(|lb| lb.class == LoadBalancerClass::Network)
    }

    /// Settings of the API load balancer, when there is one
    pub fn api_load_balancer(&self) -> Option<&LoadBalancerAccessSpec> {
        self.cluster.spec.api.as_ref().and_then(|a| a.load_balancer.as_ref())
    }

    /// The API load balancer is internal
    pub fn api_load_balancer_is_internal(&self) -> bool {
        self.api_load_balancer()
            .is_some_and(|lb| lb.lb_type == LoadBalancerType::Internal)
    }

    /// Discovery uses gossip instead of DNS
    pub fn is_gossip(&self) -> bool {
        self.cluster.is_gossip()
    }

    /// Records live in a private hosted zone
    pub fn use_private_dns(&self) -> bool {
        self.cluster.uses_private_dns()
    }

    /// `api.internal.<cluster>`
    pub fn api_internal_name(&self) -> String {
        self.cluster.api_internal_name()
    }

    /// Public API name
    pub fn api_public_name(&self) -> String {
        self.cluster.api_public_name()
    }

    /// Pod network is IPv6-only
    pub fn is_ipv6_only(&self) -> bool {
        self.cluster.is_ipv6_only()
    }

    /// Any subnet carries an IPv6 range
    pub fn is_ipv6_capable(&self) -> bool {
        self.is_ipv6_only()
            || self
                .cluster
                .spec
                .networking
                .subnets
                .iter()
                .any(|s| s.ipv6_cidr.is_some())
    }

    /// Security groups instances of a role are placed in
    ///
    /// Each distinct override id becomes a shared group; the default group is
    /// included unless every group of the role overrides it.
    pub fn security_groups(&self, role: InstanceGroupRole) -> Vec<SecurityGroupInfo> {
        let name = self.security_group_name(role);
        let description = format!("Security group for {}", role_plural(role));
        let mut groups = Vec::new();
        let mut seen = BTreeSet::new();
        let mut all_overridden = true;
        let members = self.instance_groups_with_role(role);

        for ig in &members {
            let Some(id) = &ig.spec.security_group_override else {
                all_overridden = false;
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            groups.push(SecurityGroupInfo {
                suffix: format!("-{id}"),
                task: SecurityGroup {
                    name: override_group_name(id, role),
                    id: Some(id.clone()),
                    vpc: self.link_to_vpc(),
                    description: Some(description.clone()),
                    tags: Tags::new(),
                    shared: true,
                    lifecycle: fi::Lifecycle::Sync,
                },
            });
        }

        if members.is_empty() || !all_overridden {
            groups.push(SecurityGroupInfo {
                suffix: String::new(),
                task: SecurityGroup {
                    name: name.clone(),
                    id: None,
                    vpc: self.link_to_vpc(),
                    description: Some(description),
                    tags: self.cloud_tags(&name, false),
                    shared: false,
                    lifecycle: fi::Lifecycle::Sync,
                },
            });
        }
        groups
    }
}

/// Task name of a security group override
pub fn override_group_name(id: &str, role: InstanceGroupRole) -> String {
    format!("{id}-{}", role.key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ClusterSpec, InstanceGroupSpec, NetworkingSpec};

    fn subnet(name: &str, zone: &str, subnet_type: SubnetType) -> ClusterSubnetSpec {
        ClusterSubnetSpec {
            name: name.to_string(),
            zone: zone.to_string(),
            subnet_type,
            ..Default::default()
        }
    }

    fn group(name: &str, role: InstanceGroupRole, subnets: &[&str]) -> InstanceGroup {
        InstanceGroup::new(
            name,
            InstanceGroupSpec {
                role,
                subnets: subnets.iter().map(ToString::to_string).collect(),
                ..Default::default()
            },
        )
    }

    fn model(name: &str, subnets: Vec<ClusterSubnetSpec>, groups: Vec<InstanceGroup>) -> ModelContext {
        let cluster = Cluster::new(
            name,
            ClusterSpec {
                networking: NetworkingSpec {
                    subnets,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        ModelContext::new(cluster, groups, Vec::new(), FeatureFlags::defaults()).unwrap()
    }

    #[test]
    fn test_elb_name_is_bounded_and_stable() {
        let m = model(
            "a-very-long-cluster-name-for-testing.example.com",
            vec![subnet("a", "us-test-1a", SubnetType::Public)],
            Vec::new(),
        );
        let name = m.elb_name32("api").unwrap();
        assert!(name.len() <= 32, "{name}");
        assert!(name.starts_with("api-a-very-long-cluster-"));
        assert_eq!(name, m.elb_name32("api").unwrap());
        assert_ne!(name, m.elb_name32("bastion").unwrap());
    }

    #[test]
    fn test_elb_name_short_cluster_keeps_full_base() {
        let m = model("c.example.com", vec![subnet("a", "us-test-1a", SubnetType::Public)], Vec::new());
        let name = m.elb_name32("api").unwrap();
        assert!(name.starts_with("api-c-example-com-"));
        assert_eq!(name.len(), "api-c-example-com-".len() + 6);
    }

    #[test]
    fn test_legacy_elb_name() {
        let mut m = model("c.example.com", vec![subnet("a", "us-test-1a", SubnetType::Public)], Vec::new());
        m.features = FeatureFlags::defaults().with(USE_LEGACY_ELB_NAME, true);
        assert_eq!(m.elb_name32("api").unwrap(), "api-c");
    }

    #[test]
    fn test_fnv_reference_values() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
    }

    #[test]
    fn test_gather_subnets_reports_missing() {
        let m = model(
            "c.example.com",
            vec![subnet("a", "us-test-1a", SubnetType::Private)],
            vec![group("nodes", InstanceGroupRole::Node, &["b"])],
        );
        let err = m.gather_subnets(&m.instance_groups[0]).unwrap_err();
        assert!(err.to_string().contains("subnet not found"));
    }

    #[test]
    fn test_names() {
        let m = model(
            "c.example.com",
            vec![subnet("a", "us-test-1a", SubnetType::Private)],
            vec![
                group("master-a", InstanceGroupRole::ControlPlane, &["a"]),
                group("nodes", InstanceGroupRole::Node, &["a"]),
            ],
        );
        assert_eq!(m.region(), "us-test-1");
        assert_eq!(m.autoscaling_group_name(&m.instance_groups[0]), "master-a.masters.c.example.com");
        assert_eq!(m.autoscaling_group_name(&m.instance_groups[1]), "nodes.c.example.com");
        assert_eq!(m.iam_name(InstanceGroupRole::Bastion), "bastions.c.example.com");
        assert_eq!(m.name_private_route_table_in_zone("us-test-1a"), "private-us-test-1a.c.example.com");
    }

    #[test]
    fn test_cloud_tags() {
        let m = model("c.example.com", vec![subnet("a", "us-test-1a", SubnetType::Private)], Vec::new());
        let tags = m.cloud_tags("x", true);
        assert_eq!(tags["KubernetesCluster"], "c.example.com");
        assert_eq!(tags["Name"], "x");
        assert_eq!(tags["kubernetes.io/cluster/c.example.com"], "shared");
    }

    #[test]
    fn test_instance_group_tags() {
        let mut ig = group("master-a", InstanceGroupRole::ControlPlane, &["a"]);
        ig.spec.node_labels.insert("tier".to_string(), "infra".to_string());
        ig.spec.taints.push("dedicated=infra:NoSchedule".to_string());
        let m = model("c.example.com", vec![subnet("a", "us-test-1a", SubnetType::Private)], vec![ig]);
        let tags = m.cloud_tags_for_instance_group(&m.instance_groups[0]);
        assert_eq!(tags["k8s.io/cluster-autoscaler/node-template/label/tier"], "infra");
        assert_eq!(tags["k8s.io/cluster-autoscaler/node-template/taint/dedicated"], "infra:NoSchedule");
        assert_eq!(tags["k8s.io/role/master"], "1");
        assert_eq!(tags["k8s.io/role/control-plane"], "1");
    }

    #[test]
    fn test_subnet_tie_break() {
        let subnets = vec![
            subnet("b-private", "us-test-1a", SubnetType::Private),
            subnet("a-private", "us-test-1a", SubnetType::Private),
            subnet("utility-a", "us-test-1a", SubnetType::Utility),
        ];
        let m = model(
            "c.example.com",
            subnets,
            vec![group("master-a", InstanceGroupRole::ControlPlane, &["b-private"])],
        );
        let candidates: Vec<&ClusterSubnetSpec> = m.cluster.spec.networking.subnets.iter().collect();

        let internal = m.choose_subnet_for_zone("us-test-1a", &candidates[..2], true).unwrap();
        assert_eq!(internal.name, "b-private");

        let m2 = model("c.example.com", m.cluster.spec.networking.subnets.clone(), Vec::new());
        let tied = [candidates[0], candidates[1]];
        assert_eq!(m2.choose_subnet_for_zone("us-test-1a", &tied, true).unwrap().name, "a-private");

        let public = m.load_balancer_subnets(false);
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].name, "utility-a");
    }

    #[test]
    fn test_security_group_overrides() {
        let mut a = group("nodes-a", InstanceGroupRole::Node, &["a"]);
        a.spec.security_group_override = Some("sg-shared".to_string());
        let mut b = group("nodes-b", InstanceGroupRole::Node, &["a"]);
        b.spec.security_group_override = Some("sg-shared".to_string());
        let m = model("c.example.com", vec![subnet("a", "us-test-1a", SubnetType::Private)], vec![a, b]);

        let groups = m.security_groups(InstanceGroupRole::Node);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].suffix, "-sg-shared");
        assert!(groups[0].task.shared);
        assert_eq!(groups[0].task.name, "sg-shared-node");
        assert_eq!(m.link_to_security_group_for(&m.instance_groups[0]), groups[0].link());
    }
}
