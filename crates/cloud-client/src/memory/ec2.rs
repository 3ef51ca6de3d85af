//! EC2 resources for MemoryCloud
//!
//! Handles VPCs, CIDR associations, gateways, addresses, subnets and launch templates

use serde_json::{Value, json};

use super::{MemoryCloud, locked};
use crate::error::CloudError;
use crate::models::{CloudObject, ResourceKind};

pub(super) fn derive(cloud: &MemoryCloud, object: &mut CloudObject) -> Result<(), CloudError> {
    match object.kind {
        ResourceKind::ElasticIp => {
            let n = cloud.next_id();
            object
                .attributes
                .insert("public_ip".to_string(), json!(format!("203.0.113.{}", n % 254 + 1)));
        }
        ResourceKind::VpcIpv6CidrBlock => {
            let n = cloud.next_id();
            object
                .attributes
                .entry("ipv6_cidr_block".to_string())
                .or_insert_with(|| json!(format!("2001:db8:{n:x}::/56")));
        }
        ResourceKind::Subnet | ResourceKind::RouteTable | ResourceKind::SecurityGroup | ResourceKind::InternetGateway => {
            if let Some(vpc_id) = object.attr_str("vpc_id") {
                require_vpc(cloud, &vpc_id)?;
            }
        }
        ResourceKind::LaunchTemplate => {
            object
                .attributes
                .insert("latest_version".to_string(), json!(1));
        }
        ResourceKind::Instance => {
            let n = cloud.next_id();
            object
                .attributes
                .insert("private_ip".to_string(), json!(format!("10.255.{}.{}", (n / 254) % 254, n % 254 + 1)));
        }
        _ => {}
    }
    Ok(())
}

fn require_vpc(cloud: &MemoryCloud, vpc_id: &str) -> Result<(), CloudError> {
    let exists = locked(&cloud.objects)
        .get(&ResourceKind::Vpc)
        .is_some_and(|m| m.contains_key(vpc_id));
    if exists {
        Ok(())
    } else {
        Err(CloudError::InvalidRequest(format!("VPC {vpc_id} does not exist")))
    }
}

/// Every launch template update creates a new version
pub(super) fn bump_template_version(object: &mut CloudObject) {
    let next = object.attr_i64("latest_version").unwrap_or(0) + 1;
    object
        .attributes
        .insert("latest_version".to_string(), Value::from(next));
}
