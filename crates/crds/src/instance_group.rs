//! InstanceGroup Custom Resource Definition
//!
//! A group of identically configured machines. Each group maps to one
//! autoscaling group and one launch template or configuration.

use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cluster::HookSpec;

/// InstanceGroupSpec defines the desired state of an instance group
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(group = "kops.k8s.io", version = "v1alpha2", kind = "InstanceGroup", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupSpec {
    /// Role of the machines
    pub role: InstanceGroupRole,

    /// Machine image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Instance type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,

    /// Minimum group size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<i32>,

    /// Maximum group size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i32>,

    /// Cluster subnet names the group spans
    #[serde(default)]
    pub subnets: Vec<String>,

    /// Kubernetes node labels
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,

    /// Kubernetes taints (`key=value:Effect`)
    #[serde(default)]
    pub taints: Vec<String>,

    /// Cloud tags added to the group's resources
    #[serde(default)]
    pub cloud_labels: BTreeMap<String, String>,

    /// Root volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<InstanceRootVolumeSpec>,

    /// Associate public addresses (defaults from the first subnet type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "associatePublicIP")]
    pub associate_public_ip: Option<bool>,

    /// Existing security group used instead of the role group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_override: Option<String>,

    /// Extra security groups
    #[serde(default)]
    pub additional_security_groups: Vec<String>,

    /// Existing load balancers or target groups the group registers with
    #[serde(default)]
    pub external_load_balancers: Vec<ExternalLoadBalancerSpec>,

    /// Mixed instances policy; forces a launch template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed_instances_policy: Option<MixedInstancesPolicySpec>,

    /// Spot price cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<String>,

    /// IAM overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam: Option<IamProfileSpec>,

    /// Extra cloud-init parts appended to the bootstrap script
    #[serde(default)]
    pub additional_user_data: Vec<UserData>,

    /// Detailed CloudWatch monitoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed_instance_monitoring: Option<bool>,

    /// Instance metadata service options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_metadata: Option<InstanceMetadataOptions>,

    /// Which system manages the machines
    #[serde(default)]
    pub manager: InstanceManager,

    /// Bootstrap hooks for this group only
    #[serde(default)]
    pub hooks: Vec<HookSpec>,

    /// Autoscaling processes to suspend
    #[serde(default)]
    pub suspend_processes: Vec<String>,
}

/// Instance group roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceGroupRole {
    /// Control plane, runs etcd and the API server
    #[serde(alias = "Master")]
    ControlPlane,
    /// Worker node
    #[default]
    Node,
    /// Dedicated API server node
    #[serde(rename = "APIServer")]
    ApiServer,
    /// SSH bastion
    Bastion,
}

impl InstanceGroupRole {
    /// Role key used in IAM names, policy maps and tags
    pub fn key(self) -> &'static str {
        match self {
            InstanceGroupRole::ControlPlane => "master",
            InstanceGroupRole::Node => "node",
            InstanceGroupRole::ApiServer => "apiserver",
            InstanceGroupRole::Bastion => "bastion",
        }
    }

    /// Path segment used under `igconfig/`
    pub fn config_path_segment(self) -> &'static str {
        match self {
            InstanceGroupRole::ControlPlane => "control-plane",
            InstanceGroupRole::Node => "node",
            InstanceGroupRole::ApiServer => "apiserver",
            InstanceGroupRole::Bastion => "bastion",
        }
    }
}

impl fmt::Display for InstanceGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceGroupRole::ControlPlane => "ControlPlane",
            InstanceGroupRole::Node => "Node",
            InstanceGroupRole::ApiServer => "APIServer",
            InstanceGroupRole::Bastion => "Bastion",
        };
        f.write_str(s)
    }
}

/// Root volume settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRootVolumeSpec {
    /// Size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,
    /// Volume type (`gp2`, `gp3`, `io1`, `io2`)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub volume_type: Option<String>,
    /// Provisioned IOPS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i32>,
    /// Provisioned throughput in MiB/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<i32>,
    /// Encrypt the root volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<bool>,
    /// KMS key for encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

/// Existing load balancer or target group
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLoadBalancerSpec {
    /// Classic load balancer name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_name: Option<String>,
    /// Target group ARN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "targetGroupARN")]
    pub target_group_arn: Option<String>,
}

/// Mixed instances policy
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MixedInstancesPolicySpec {
    /// Instance type overrides
    #[serde(default)]
    pub instances: Vec<String>,
    /// On-demand base capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_base: Option<i64>,
    /// Percentage of on-demand above the base
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_above_base: Option<i64>,
    /// Spot allocation strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_allocation_strategy: Option<String>,
}

/// IAM overrides of an instance group
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IamProfileSpec {
    /// Existing instance profile ARN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Extra user data part
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    /// Part name
    pub name: String,
    /// MIME type
    #[serde(rename = "type")]
    pub content_type: String,
    /// Body
    pub content: String,
}

/// Instance metadata options
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadataOptions {
    /// Hop limit for PUT responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_put_response_hop_limit: Option<i64>,
    /// `optional` or `required`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_tokens: Option<String>,
}

/// Instance managers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum InstanceManager {
    /// Autoscaling group managed by this tool
    #[default]
    CloudGroup,
    /// Spotinst elastigroup
    Spotinst,
}

impl InstanceGroup {
    /// Group name from metadata
    pub fn group_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Group runs the control plane
    pub fn is_control_plane(&self) -> bool {
        self.spec.role == InstanceGroupRole::ControlPlane
    }

    /// Group runs API servers (control plane or dedicated)
    pub fn has_api_server(&self) -> bool {
        matches!(
            self.spec.role,
            InstanceGroupRole::ControlPlane | InstanceGroupRole::ApiServer
        )
    }

    /// Group is a bastion
    pub fn is_bastion(&self) -> bool {
        self.spec.role == InstanceGroupRole::Bastion
    }
}
