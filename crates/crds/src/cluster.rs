//! Cluster Custom Resource Definition
//!
//! The top-level description of a cluster: networking, topology, etcd,
//! API access and IAM. Builders read it through the model context and never
//! mutate it during a run.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::instance_group::InstanceGroupRole;

/// Suffix of cluster names that use gossip instead of a DNS zone.
pub const GOSSIP_SUFFIX: &str = ".k8s.local";

/// ClusterSpec defines the desired state of a cluster
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(group = "kops.k8s.io", version = "v1alpha2", kind = "Cluster")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cloud provider hosting the cluster
    #[serde(default)]
    pub cloud_provider: CloudProvider,

    /// Kubernetes version (e.g. "1.30.2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Base URI of the state store holding managed files for this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_base: Option<String>,

    /// DNS zone hosting the API records (defaults to the cluster domain)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_zone: Option<String>,

    /// Name of a pre-existing EC2 key pair; when unset a key is imported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    /// Cluster DNS domain used in service names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_dns_domain: Option<String>,

    /// Networking configuration (VPC, subnets, CNI)
    #[serde(default)]
    pub networking: NetworkingSpec,

    /// Topology (DNS mode, bastion)
    #[serde(default)]
    pub topology: TopologySpec,

    /// Etcd clusters backing the control plane
    #[serde(default)]
    pub etcd_clusters: Vec<EtcdClusterSpec>,

    /// API server access configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiSpec>,

    /// CIDRs allowed to SSH into the cluster
    #[serde(default)]
    pub ssh_access: Vec<String>,

    /// CIDRs allowed to reach the API server
    #[serde(default)]
    pub kubernetes_api_access: Vec<String>,

    /// Tags applied to every cloud resource
    #[serde(default)]
    pub cloud_labels: BTreeMap<String, String>,

    /// IAM configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam: Option<IamSpec>,

    /// Managed policy ARNs attached per role key (`master`, `node`, `bastion`)
    #[serde(default)]
    pub external_policies: BTreeMap<String, Vec<String>>,

    /// Inline policy statements appended per role key
    #[serde(default)]
    pub additional_policies: BTreeMap<String, String>,

    /// Service account issuer discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_issuer_discovery: Option<ServiceAccountIssuerDiscoveryConfig>,

    /// Node termination handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_termination_handler: Option<NodeTerminationHandlerSpec>,

    /// kube-apiserver settings consumed by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_api_server: Option<KubeApiServerConfig>,

    /// Bootstrap hooks run by the node bootstrap script
    #[serde(default)]
    pub hooks: Vec<HookSpec>,

    /// Extra locations the keystore and secrets are mirrored to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_store: Option<ConfigStoreSpec>,
}

/// Mirror locations for cluster secrets
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStoreSpec {
    /// Keystore mirror
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypairs: Option<String>,
    /// Secret store mirror
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<String>,
}

/// Supported cloud providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon Web Services
    #[default]
    Aws,
    /// Google Compute Engine
    Gce,
    /// Microsoft Azure
    Azure,
    /// DigitalOcean
    #[serde(rename = "digitalocean")]
    DigitalOcean,
    /// Hetzner Cloud
    Hetzner,
    /// OpenStack
    Openstack,
    /// Scaleway
    Scaleway,
}

/// Networking configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingSpec {
    /// Id of a shared VPC; when set the VPC is not managed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,

    /// Primary VPC CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "networkCIDR")]
    pub network_cidr: Option<String>,

    /// Extra CIDR blocks associated with the VPC
    #[serde(default, rename = "additionalNetworkCIDRs")]
    pub additional_network_cidrs: Vec<String>,

    /// Pod and service address space; an IPv6 value makes the cluster IPv6-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "nonMasqueradeCIDR")]
    pub non_masquerade_cidr: Option<String>,

    /// Service cluster IP range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cluster_ip_range: Option<String>,

    /// Subnets of the cluster
    #[serde(default)]
    pub subnets: Vec<ClusterSubnetSpec>,

    /// Tag subnets with cluster ownership (defaults to true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_subnets: Option<bool>,

    /// Calico CNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calico: Option<CalicoNetworkingSpec>,

    /// Cilium CNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cilium: Option<CiliumNetworkingSpec>,

    /// kube-router CNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_router: Option<KubeRouterNetworkingSpec>,

    /// Amazon VPC CNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amazon_vpc: Option<AmazonVpcNetworkingSpec>,
}

/// Calico CNI settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalicoNetworkingSpec {
    /// Only encapsulate traffic crossing subnets
    #[serde(default)]
    pub cross_subnet: bool,
}

/// Cilium CNI settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CiliumNetworkingSpec {
    /// Cilium keeps its state in a dedicated etcd cluster managed by etcd-manager
    #[serde(default)]
    pub etcd_managed: bool,
}

/// kube-router CNI settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeRouterNetworkingSpec {
    /// Image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Amazon VPC CNI settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AmazonVpcNetworkingSpec {
    /// Image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Subnet of the cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSubnetSpec {
    /// Subnet name, referenced by instance groups
    pub name: String,

    /// Availability zone
    pub zone: String,

    /// Subnet type
    #[serde(rename = "type")]
    pub subnet_type: SubnetType,

    /// IPv4 CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "cidr")]
    pub cidr: Option<String>,

    /// IPv6 CIDR; `"/64#N"` style allocations are passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "ipv6CIDR")]
    pub ipv6_cidr: Option<String>,

    /// Provider id of a shared subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Egress target for private subnets (`nat-`, `eipalloc-`, `i-`, `tgw-`, `External`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<String>,

    /// Elastic IP to associate with the zone NAT gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "publicIP")]
    pub public_ip: Option<String>,

    /// Extra routes in the subnet's route table
    #[serde(default)]
    pub additional_routes: Vec<RouteSpec>,
}

/// Subnet types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubnetType {
    /// Routed through the internet gateway, hosts get public addresses
    #[default]
    Public,
    /// Egress through NAT
    Private,
    /// Public subnet used only for load balancers and bastions
    Utility,
    /// Private subnet with IPv6 egress
    DualStack,
}

impl SubnetType {
    /// Name used in tags and messages
    pub fn as_str(self) -> &'static str {
        match self {
            SubnetType::Public => "Public",
            SubnetType::Private => "Private",
            SubnetType::Utility => "Utility",
            SubnetType::DualStack => "DualStack",
        }
    }

    /// Subnets routed through the zone's private route table
    pub fn is_private(self) -> bool {
        matches!(self, SubnetType::Private | SubnetType::DualStack)
    }
}

/// Additional route of a subnet
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Destination CIDR
    pub cidr: String,
    /// Target id (`pcx-`, `i-`, `nat-`, `tgw-`, `igw-`, `eigw-`)
    pub target: String,
}

/// Topology settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpec {
    /// DNS mode
    #[serde(default)]
    pub dns: DnsType,

    /// Bastion configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<BastionSpec>,
}

/// DNS modes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum DnsType {
    /// Public hosted zone
    #[default]
    Public,
    /// Private hosted zone attached to the VPC
    Private,
    /// No DNS; gossip or load balancer addresses
    None,
}

/// Bastion settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BastionSpec {
    /// DNS name published for the bastion load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_name: Option<String>,

    /// Idle timeout of the bastion load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_seconds: Option<i64>,

    /// Security groups added to the bastion load balancer
    #[serde(default)]
    pub additional_security_groups: Vec<String>,
}

/// Etcd cluster declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    /// Cluster name (`main`, `events`, `cilium`)
    pub name: String,

    /// Etcd version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Members, one per control-plane instance group
    #[serde(default, rename = "etcdMembers")]
    pub members: Vec<EtcdMemberSpec>,

    /// etcd-manager overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<EtcdManagerSpec>,

    /// Backup configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backups: Option<EtcdBackupSpec>,
}

/// Etcd member declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdMemberSpec {
    /// Member name, usually the zone letter
    pub name: String,

    /// Control-plane instance group hosting the member
    pub instance_group: String,

    /// Volume type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,

    /// Volume size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<i32>,

    /// Provisioned IOPS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_iops: Option<i32>,

    /// Provisioned throughput in MiB/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_throughput: Option<i32>,

    /// KMS key for volume encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,

    /// Encrypt the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_volume: Option<bool>,
}

/// etcd-manager overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdManagerSpec {
    /// Image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Log verbosity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i32>,

    /// Backup interval, e.g. `15m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_interval: Option<String>,

    /// Extra environment
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

/// Environment variable
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    #[serde(default)]
    pub value: String,
}

/// Etcd backup settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdBackupSpec {
    /// Store receiving backups and the control files
    pub backup_store: String,
}

/// API access configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    /// Load balancer in front of the API servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerAccessSpec>,

    /// Public DNS name of the API (defaults to `api.<cluster>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_name: Option<String>,
}

/// API load balancer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerAccessSpec {
    /// Public or internal
    #[serde(default, rename = "type")]
    pub lb_type: LoadBalancerType,

    /// Classic or network load balancer
    #[serde(default)]
    pub class: LoadBalancerClass,

    /// Idle timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_seconds: Option<i64>,

    /// Certificate ARN attached to the listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate: Option<String>,

    /// SSL policy of the listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_policy: Option<String>,

    /// Enable cross-zone load balancing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_zone_load_balancing: Option<bool>,

    /// Use an existing security group instead of `api-elb.<cluster>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_override: Option<String>,

    /// Extra security groups attached to the load balancer
    #[serde(default)]
    pub additional_security_groups: Vec<String>,

    /// Explicit subnets; bypasses the per-zone subnet choice
    #[serde(default)]
    pub subnets: Vec<LoadBalancerSubnetSpec>,
}

/// Load balancer exposure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum LoadBalancerType {
    /// Internet facing
    #[default]
    Public,
    /// VPC internal
    Internal,
}

/// Load balancer implementation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum LoadBalancerClass {
    /// Classic ELB
    #[default]
    Classic,
    /// Network load balancer
    Network,
}

/// Explicit load balancer subnet
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSubnetSpec {
    /// Subnet name
    pub name: String,
    /// Fixed private address (network load balancers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "privateIPv4Address")]
    pub private_ipv4_address: Option<String>,
    /// Elastic IP allocation (public network load balancers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<String>,
}

/// IAM configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IamSpec {
    /// Use the broad legacy policies
    #[serde(default)]
    pub legacy: bool,

    /// Allow nodes to pull from ECR
    #[serde(default)]
    pub allow_container_registry: bool,

    /// Permissions boundary applied to every role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions_boundary: Option<String>,

    /// Grant workload permissions through service account roles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_service_account_external_permissions: Option<bool>,

    /// Service accounts granted AWS permissions
    #[serde(default)]
    pub service_account_external_permissions: Vec<ServiceAccountExternalPermission>,
}

/// AWS permissions of one service account
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountExternalPermission {
    /// Service account name
    pub name: String,
    /// Namespace (may contain `*`)
    pub namespace: String,
    /// AWS permissions
    #[serde(default)]
    pub aws: AwsPermission,
}

/// AWS permission sources
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsPermission {
    /// Managed policies attached to the role
    #[serde(default, rename = "policyARNs")]
    pub policy_arns: Vec<String>,
    /// Inline policy statements (JSON array)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_policy: Option<String>,
}

/// Service account issuer discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountIssuerDiscoveryConfig {
    /// Public store serving the OIDC discovery documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_store: Option<String>,

    /// Register the issuer as an IAM OIDC provider
    #[serde(default, rename = "enableAWSOIDCProvider")]
    pub enable_aws_oidc_provider: bool,

    /// Extra audiences accepted by the provider
    #[serde(default)]
    pub additional_audiences: Vec<String>,

    /// Certificate thumbprints of the issuer endpoint
    #[serde(default)]
    pub thumbprints: Vec<String>,
}

/// Node termination handler settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeTerminationHandlerSpec {
    /// Deploy the handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Queue processor mode: drain on events delivered through SQS
    #[serde(default, rename = "enableSQSTerminationDraining")]
    pub enable_sqs_termination_draining: Option<bool>,

    /// Tag marking the groups the handler manages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "managedASGTag")]
    pub managed_asg_tag: Option<String>,
}

/// kube-apiserver settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeApiServerConfig {
    /// Service account token issuer URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_issuer: Option<String>,
}

/// Bootstrap hook executed by the node bootstrap script
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HookSpec {
    /// Hook name
    pub name: String,

    /// Roles the hook applies to; empty means all roles
    #[serde(default)]
    pub roles: Vec<InstanceGroupRole>,

    /// When the hook runs relative to nodeup
    #[serde(default)]
    pub phase: HookPhase,

    /// Shell snippet
    pub script: String,
}

/// Hook position in the bootstrap script
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum HookPhase {
    /// Before nodeup is downloaded
    #[default]
    BeforeInstall,
    /// After nodeup ran
    AfterInstall,
}

impl Cluster {
    /// Cluster name from metadata
    pub fn cluster_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Region derived from the zone of the first subnet (`us-east-1a` -> `us-east-1`)
    pub fn region(&self) -> Option<String> {
        self.spec
            .networking
            .subnets
            .first()
            .map(|s| s.zone.trim_end_matches(|c: char| c.is_ascii_alphabetic()).to_string())
    }

    /// Cluster uses gossip for discovery instead of DNS records
    pub fn is_gossip(&self) -> bool {
        self.cluster_name().ends_with(GOSSIP_SUFFIX) || self.spec.topology.dns == DnsType::None
    }

    /// Records live in a private hosted zone
    pub fn uses_private_dns(&self) -> bool {
        self.spec.topology.dns == DnsType::Private
    }

    /// Pod network is IPv6-only
    pub fn is_ipv6_only(&self) -> bool {
        self.spec
            .networking
            .non_masquerade_cidr
            .as_deref()
            .is_some_and(|c| c.contains(':'))
    }

    /// VPC is shared and not managed by this cluster
    pub fn shared_vpc(&self) -> bool {
        self.spec.networking.network_id.is_some()
    }

    /// Cilium keeps its state in a managed etcd cluster
    pub fn cilium_etcd_managed(&self) -> bool {
        self.spec
            .networking
            .cilium
            .as_ref()
            .is_some_and(|c| c.etcd_managed)
    }

    /// Public API name, `api.<cluster>` unless overridden
    pub fn api_public_name(&self) -> String {
        self.spec
            .api
            .as_ref()
            .and_then(|a| a.public_name.clone())
            .unwrap_or_else(|| format!("api.{}", self.cluster_name()))
    }

    /// Internal API name, always `api.internal.<cluster>`
    pub fn api_internal_name(&self) -> String {
        format!("api.internal.{}", self.cluster_name())
    }

    /// Cluster DNS domain (`cluster.local` by default)
    pub fn cluster_dns_domain(&self) -> &str {
        self.spec.cluster_dns_domain.as_deref().unwrap_or("cluster.local")
    }

    /// Zone hosting public records
    pub fn dns_zone(&self) -> String {
        self.spec
            .dns_zone
            .clone()
            .unwrap_or_else(|| self.cluster_name().to_string())
    }

    /// Service account issuer; defaults to the internal API name
    pub fn service_account_issuer(&self) -> String {
        self.spec
            .kube_api_server
            .as_ref()
            .and_then(|k| k.service_account_issuer.clone())
            .unwrap_or_else(|| format!("https://{}", self.api_internal_name()))
    }
}
