//! IAM resources for MemoryCloud
//!
//! Handles roles, instance profiles, policies and OIDC providers

use serde_json::json;

use super::{MemoryCloud, locked};
use crate::cloud_trait::CloudApi;
use crate::error::CloudError;
use crate::models::{CloudObject, ResourceKind};

pub(super) fn derive(cloud: &MemoryCloud, object: &mut CloudObject) -> Result<(), CloudError> {
    let prefix = format!("arn:{}:iam::{}", cloud.partition(), cloud.account_id());
    match object.kind {
        ResourceKind::IamRole => {
            let path = object.attr_str("path").unwrap_or_else(|| "/".to_string());
            object
                .attributes
                .insert("arn".to_string(), json!(format!("{prefix}:role{path}{}", object.id)));
        }
        ResourceKind::IamInstanceProfile => {
            object.attributes.insert(
                "arn".to_string(),
                json!(format!("{prefix}:instance-profile/{}", object.id)),
            );
        }
        ResourceKind::IamOidcProvider => {
            let url = object.attr_str("url").unwrap_or_default();
            let host = url.trim_start_matches("https://");
            object
                .attributes
                .insert("arn".to_string(), json!(format!("{prefix}:oidc-provider/{host}")));
        }
        ResourceKind::IamRolePolicy | ResourceKind::IamRolePolicyAttachment | ResourceKind::IamInstanceProfileRole => {
            let role = object.attr_str("role_name").unwrap_or_default();
            let exists = locked(&cloud.objects)
                .get(&ResourceKind::IamRole)
                .is_some_and(|m| m.contains_key(&role));
            if !exists {
                return Err(CloudError::InvalidRequest(format!("IAM role {role} does not exist")));
            }
        }
        _ => {}
    }
    Ok(())
}
