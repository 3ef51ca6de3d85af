//! Load balancer resources for MemoryCloud

use serde_json::json;

use super::MemoryCloud;
use crate::cloud_trait::CloudApi;
use crate::models::{CloudObject, ResourceKind};

/// Canonical hosted zone reported for load balancer aliases
const ELB_HOSTED_ZONE_ID: &str = "Z1MEMORYELB0000";

pub(super) fn derive(cloud: &MemoryCloud, object: &mut CloudObject) {
    let name = object.attr_str("name").unwrap_or_else(|| object.id.clone());
    let region = cloud.region().to_string();
    match object.kind {
        ResourceKind::ClassicLoadBalancer => {
            let n = cloud.next_id();
            object.attributes.insert(
                "dns_name".to_string(),
                json!(format!("{name}-{n}.{region}.elb.amazonaws.com")),
            );
            object
                .attributes
                .insert("hosted_zone_id".to_string(), json!(ELB_HOSTED_ZONE_ID));
        }
        ResourceKind::NetworkLoadBalancer => {
            let suffix = object.id.trim_start_matches("net-").to_string();
            object.attributes.insert(
                "arn".to_string(),
                json!(format!(
                    "arn:{}:elasticloadbalancing:{region}:{}:loadbalancer/net/{name}/{suffix}",
                    cloud.partition(),
                    cloud.account_id()
                )),
            );
            object.attributes.insert(
                "dns_name".to_string(),
                json!(format!("{name}-{suffix}.elb.{region}.amazonaws.com")),
            );
            object
                .attributes
                .insert("hosted_zone_id".to_string(), json!(ELB_HOSTED_ZONE_ID));
        }
        ResourceKind::TargetGroup => {
            let suffix = object.id.trim_start_matches("tg-").to_string();
            object.attributes.insert(
                "arn".to_string(),
                json!(format!(
                    "arn:{}:elasticloadbalancing:{region}:{}:targetgroup/{name}/{suffix}",
                    cloud.partition(),
                    cloud.account_id()
                )),
            );
        }
        _ => {}
    }
}
