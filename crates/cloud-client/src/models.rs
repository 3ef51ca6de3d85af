//! Cloud resource records
//!
//! Every backend object is a `CloudObject`: a kind, a provider id, a flat
//! attribute map and its tags. Tasks map their typed fields to and from
//! these records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kinds of backend resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// EC2 VPC
    Vpc,
    /// Secondary IPv4 CIDR association
    VpcCidrBlock,
    /// Amazon-provided IPv6 CIDR association
    VpcIpv6CidrBlock,
    /// DHCP options set
    DhcpOptions,
    /// DHCP options to VPC association
    DhcpOptionsAssociation,
    /// Internet gateway
    InternetGateway,
    /// Egress-only internet gateway
    EgressOnlyInternetGateway,
    /// NAT gateway
    NatGateway,
    /// Elastic IP allocation
    ElasticIp,
    /// EC2 instance
    Instance,
    /// Subnet
    Subnet,
    /// Route table
    RouteTable,
    /// Subnet to route table association
    RouteTableAssociation,
    /// Route in a route table
    Route,
    /// Security group
    SecurityGroup,
    /// Security group ingress or egress rule
    SecurityGroupRule,
    /// Classic ELB
    ClassicLoadBalancer,
    /// Network load balancer
    NetworkLoadBalancer,
    /// Load balancer target group
    TargetGroup,
    /// Launch configuration
    LaunchConfiguration,
    /// Launch template
    LaunchTemplate,
    /// Autoscaling group
    AutoscalingGroup,
    /// Autoscaling lifecycle hook
    LifecycleHook,
    /// Classic ELB attachment of an autoscaling group
    LoadBalancerAttachment,
    /// Target group attachment of an autoscaling group
    TargetGroupAttachment,
    /// IAM role
    IamRole,
    /// Inline IAM role policy
    IamRolePolicy,
    /// Managed IAM policy attachment
    IamRolePolicyAttachment,
    /// IAM instance profile
    IamInstanceProfile,
    /// Role membership of an instance profile
    IamInstanceProfileRole,
    /// IAM OIDC identity provider
    IamOidcProvider,
    /// EBS volume
    EbsVolume,
    /// Route53 hosted zone
    HostedZone,
    /// Route53 record set
    ResourceRecordSet,
    /// EC2 key pair
    KeyPair,
    /// SQS queue
    SqsQueue,
    /// EventBridge rule
    EventRule,
    /// EventBridge rule target
    EventTarget,
}

impl ResourceKind {
    /// Stable lowercase name used in logs and snapshots
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::VpcCidrBlock => "vpc-cidr-block",
            ResourceKind::VpcIpv6CidrBlock => "vpc-ipv6-cidr-block",
            ResourceKind::DhcpOptions => "dhcp-options",
            ResourceKind::DhcpOptionsAssociation => "dhcp-options-association",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::EgressOnlyInternetGateway => "egress-only-internet-gateway",
            ResourceKind::NatGateway => "nat-gateway",
            ResourceKind::ElasticIp => "elastic-ip",
            ResourceKind::Instance => "instance",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::RouteTableAssociation => "route-table-association",
            ResourceKind::Route => "route",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::SecurityGroupRule => "security-group-rule",
            ResourceKind::ClassicLoadBalancer => "classic-load-balancer",
            ResourceKind::NetworkLoadBalancer => "network-load-balancer",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::LaunchConfiguration => "launch-configuration",
            ResourceKind::LaunchTemplate => "launch-template",
            ResourceKind::AutoscalingGroup => "autoscaling-group",
            ResourceKind::LifecycleHook => "lifecycle-hook",
            ResourceKind::LoadBalancerAttachment => "load-balancer-attachment",
            ResourceKind::TargetGroupAttachment => "target-group-attachment",
            ResourceKind::IamRole => "iam-role",
            ResourceKind::IamRolePolicy => "iam-role-policy",
            ResourceKind::IamRolePolicyAttachment => "iam-role-policy-attachment",
            ResourceKind::IamInstanceProfile => "iam-instance-profile",
            ResourceKind::IamInstanceProfileRole => "iam-instance-profile-role",
            ResourceKind::IamOidcProvider => "iam-oidc-provider",
            ResourceKind::EbsVolume => "ebs-volume",
            ResourceKind::HostedZone => "hosted-zone",
            ResourceKind::ResourceRecordSet => "resource-record-set",
            ResourceKind::KeyPair => "key-pair",
            ResourceKind::SqsQueue => "sqs-queue",
            ResourceKind::EventRule => "event-rule",
            ResourceKind::EventTarget => "event-target",
        }
    }

    /// Kinds whose provider id is the `name` attribute rather than a generated id
    pub fn is_named_by_caller(self) -> bool {
        matches!(
            self,
            ResourceKind::ClassicLoadBalancer
                | ResourceKind::LaunchConfiguration
                | ResourceKind::AutoscalingGroup
                | ResourceKind::IamRole
                | ResourceKind::IamInstanceProfile
                | ResourceKind::KeyPair
                | ResourceKind::SqsQueue
                | ResourceKind::EventRule
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource as the backend reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudObject {
    /// Provider id (`vpc-…`, an ARN suffix, or the caller-chosen name)
    pub id: String,
    /// Resource kind
    pub kind: ResourceKind,
    /// Flat attribute map
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Resource tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl CloudObject {
    /// String attribute
    pub fn attr_str(&self, key: &str) -> Option<String> {
        self.attributes.get(key).and_then(Value::as_str).map(ToString::to_string)
    }

    /// Integer attribute
    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(Value::as_i64)
    }

    /// Boolean attribute
    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(Value::as_bool)
    }

    /// List-of-strings attribute (missing means empty)
    pub fn attr_strings(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attribute decoded into any deserializable type
    pub fn attr<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Value of the `Name` tag
    pub fn name_tag(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }

    /// Checks a single query filter against this object
    ///
    /// Supported keys: `id`, `tag:<key>`, `tag-key`, or any attribute name.
    /// Array attributes match when any element matches.
    pub fn matches(&self, key: &str, value: &str) -> bool {
        if key == "id" {
            return self.id == value;
        }
        if key == "tag-key" {
            return self.tags.contains_key(value);
        }
        if let Some(tag) = key.strip_prefix("tag:") {
            return self.tags.get(tag).is_some_and(|v| v == value);
        }
        match self.attributes.get(key) {
            Some(Value::Array(items)) => items.iter().any(|item| value_matches(item, value)),
            Some(v) => value_matches(v, value),
            None => false,
        }
    }
}

fn value_matches(v: &Value, expected: &str) -> bool {
    match v {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}
