//! Autoscaling, Route53, SQS, EventBridge and key pair resources for MemoryCloud

use serde_json::json;

use super::MemoryCloud;
use crate::cloud_trait::CloudApi;
use crate::models::{CloudObject, ResourceKind};

pub(super) fn derive(cloud: &MemoryCloud, object: &mut CloudObject) {
    let region = cloud.region().to_string();
    let account = cloud.account_id().to_string();
    let partition = cloud.partition().to_string();
    let id = object.id.clone();
    match object.kind {
        ResourceKind::AutoscalingGroup => {
            object.attributes.insert(
                "arn".to_string(),
                json!(format!(
                    "arn:{partition}:autoscaling:{region}:{account}:autoScalingGroup:{id}:autoScalingGroupName/{id}"
                )),
            );
        }
        ResourceKind::HostedZone => {
            let ns = (1..=4)
                .map(|i| format!("ns-{i}.awsdns-{id}.net"))
                .collect::<Vec<_>>();
            object.attributes.insert("name_servers".to_string(), json!(ns));
        }
        ResourceKind::SqsQueue => {
            object.attributes.insert(
                "url".to_string(),
                json!(format!("https://sqs.{region}.amazonaws.com/{account}/{id}")),
            );
            object
                .attributes
                .insert("arn".to_string(), json!(format!("arn:{partition}:sqs:{region}:{account}:{id}")));
        }
        ResourceKind::EventRule => {
            object.attributes.insert(
                "arn".to_string(),
                json!(format!("arn:{partition}:events:{region}:{account}:rule/{id}")),
            );
        }
        ResourceKind::KeyPair => {
            let n = cloud.next_id();
            object
                .attributes
                .insert("key_pair_id".to_string(), json!(format!("key-{n:017x}")));
        }
        _ => {}
    }
}
