//! AWS task catalogue
//!
//! One task type per cloud resource kind. Each knows how to find itself
//! through [`cloud_client::CloudApi`], create or update itself directly, and
//! render itself as Terraform or CloudFormation. Store-backed tasks
//! (keypairs, secrets, managed files, mirrors) write to the cluster state
//! for every target.

mod util;

pub mod autoscaling;
pub mod bootstrap;
pub mod dns;
pub mod ebs;
pub mod eventbridge;
pub mod gateway;
pub mod iam;
pub mod keypair;
pub mod launch;
pub mod loadbalancer;
pub mod managedfile;
pub mod mirror;
pub mod route;
pub mod secret;
pub mod securitygroup;
pub mod sqs;
pub mod sshkey;
pub mod subnet;
pub mod vpc;

pub use autoscaling::{
    AutoscalingGroup, AutoscalingLifecycleHook, ExternalLoadBalancerAttachment, ExternalTargetGroupAttachment,
    MixedInstancesPolicy,
};
pub use bootstrap::{BootstrapScript, NodeupConfig, UserDataPart};
pub use dns::{AliasTarget, DnsName, DnsZone};
pub use ebs::EbsVolume;
pub use eventbridge::{EventBridgeRule, EventBridgeTarget};
pub use gateway::{EgressOnlyInternetGateway, ElasticIp, InternetGateway, NatGateway};
pub use iam::{IamInstanceProfile, IamInstanceProfileRole, IamOidcProvider, IamRole, IamRolePolicy};
pub use keypair::Keypair;
pub use launch::{LaunchConfiguration, LaunchTemplate, MachineSpec, RootVolume};
pub use loadbalancer::{
    ClassicHealthCheck, ClassicListener, ClassicLoadBalancer, NetworkListener, NetworkLoadBalancer, TargetGroup,
};
pub use managedfile::ManagedFile;
pub use mirror::{MirrorKeystore, MirrorSecrets};
pub use route::{Route, RouteTable, RouteTableAssociation};
pub use secret::Secret;
pub use securitygroup::{SecurityGroup, SecurityGroupRule};
pub use sqs::SqsQueue;
pub use sshkey::SshKey;
pub use subnet::Subnet;
pub use util::Tags;
pub use vpc::{DhcpOptions, Vpc, VpcAmazonIpv6CidrBlock, VpcCidrBlock, VpcDhcpOptionsAssociation};
